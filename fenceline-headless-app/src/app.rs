use std::{path::Path, sync::Arc};

use anyhow::Context;
use fenceline_gfx::{
    backends::null::{NullBackend, NullCompletionMode},
    commands::execution_queue::GfxSubmission,
    foundation::queue_kind::GfxQueueMask,
    resources::buffer::{GfxBufferDesc, GfxBufferUsage},
};
use fenceline_render_interface::{
    config::GpuContextConfig,
    gpu_context::GpuContext,
    task_scheduler::{GfxTaskScheduler, RayonTaskScheduler},
};
use parking_lot::Mutex;
use rayon::prelude::*;

/// 每个 worker 每帧上传的常量大小
const WORKER_CONSTANTS_SIZE: u64 = 256;
/// 每个 worker 每帧申请的 descriptor table 数量
const TABLES_PER_WORKER: u32 = 8;

/// 在 null 后端上跑帧循环：多个 worker 并发地分配 descriptor、上传数据、释放临时资源，
/// 每帧结束时 recycle 并输出统计
pub struct HeadlessApp {
    ctx: GpuContext,
    scheduler: Arc<RayonTaskScheduler>,
}
// init & destroy
impl HeadlessApp {
    pub fn new(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => GpuContextConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => GpuContextConfig::default(),
        };
        log::info!("config: {:?}", config);

        let scheduler = Arc::new(RayonTaskScheduler::new(config.worker_count)?);
        let backend = Arc::new(NullBackend::new(NullCompletionMode::Immediate));
        let ctx = GpuContext::new(backend, config, scheduler.clone())?;

        Ok(Self { ctx, scheduler })
    }
}
// run
impl HeadlessApp {
    pub fn run(&mut self, frame_count: u64) -> anyhow::Result<()> {
        for _ in 0..frame_count {
            self.ctx.begin_frame();
            self.run_frame()?;
            self.ctx.recycle()?;

            let frame_id = self.ctx.frame_counter().frame_id();
            if frame_id % 60 == 0 {
                log::info!(
                    "{} descriptors: {:?}",
                    self.ctx.frame_counter().frame_name(),
                    self.ctx.shader_visible_descriptors().stats()
                );
                log::info!("{} memory: {:?}", self.ctx.frame_counter().frame_name(), self.ctx.gpu_memory().stats());
            }
        }
        self.ctx.wait_for_idle()?;
        log::info!("run {} frames", frame_count);
        Ok(())
    }

    fn run_frame(&self) -> anyhow::Result<()> {
        let _span = tracy_client::span!("HeadlessApp::run_frame");
        let ctx = &self.ctx;
        let submissions = Mutex::new(Vec::new());

        self.scheduler.pool().install(|| {
            (0..self.scheduler.worker_count()).into_par_iter().try_for_each(|worker_index| {
                if let Some(submission) = Self::run_worker(ctx, worker_index)? {
                    submissions.lock().push(submission);
                }
                anyhow::Ok(())
            })
        })?;

        // 模拟这一帧的绘制：graphics queue 等待所有 upload 之后提交
        let graphics_queue = ctx.graphics_queue();
        for submission in submissions.into_inner() {
            if let Some(queue) = ctx.queue(submission.queue)
                && submission.queue != graphics_queue.kind()
            {
                graphics_queue.gpu_wait(queue, submission.fence_value)?;
            }
        }
        let draw_ctx = graphics_queue.get_command_context()?;
        graphics_queue.submit_and_release(draw_ctx)?;
        Ok(())
    }

    fn run_worker(ctx: &GpuContext, worker_index: usize) -> anyhow::Result<Option<GfxSubmission>> {
        let _span = tracy_client::span!("HeadlessApp::run_worker");
        let memory = ctx.gpu_memory();
        let frame_id = ctx.frame_counter().frame_id();

        // 每个 worker 一个持久的常量 buffer
        let constants = memory.get_or_create_persistent_buffer(
            &format!("worker-{}-constants", worker_index),
            &GfxBufferDesc::device_local(WORKER_CONSTANTS_SIZE, GfxBufferUsage::UNIFORM, "worker-constants"),
        )?;
        let constants = memory.persistent_buffer(constants).context("persistent buffer released")?;

        // 临时的 vertex buffer，用完之后交给延迟释放
        let vertex_count = 64 + (frame_id as usize * 7 + worker_index * 13) % 512;
        let vertices: Vec<u8> = (0..vertex_count * 16).map(|i| (i + worker_index) as u8).collect();
        let vertex_buffer = memory.create_buffer(&GfxBufferDesc::device_local(
            vertices.len() as u64,
            GfxBufferUsage::VERTEX,
            format!("worker-{}-vertices", worker_index),
        ))?;

        let submission = {
            let mut batch = memory.upload_batch(worker_index);
            batch.begin();
            batch.upload_buffer(constants, 0, &frame_id.to_le_bytes())?;
            batch.upload_buffer(vertex_buffer.raw(), 0, &vertices)?;
            batch.end()?
        };

        // 这一帧使用的 descriptor
        let tables: Vec<_> = (0..TABLES_PER_WORKER)
            .map(|i| ctx.shader_visible_descriptors().allocate(1 + (i * 3 + worker_index as u32) % 16))
            .collect();
        let staging = ctx.cpu_descriptors().allocate(4);
        drop(tables);
        drop(staging);

        memory.release_buffer(vertex_buffer, GfxQueueMask::GRAPHICS | GfxQueueMask::COMPUTE);
        Ok(submission)
    }
}
