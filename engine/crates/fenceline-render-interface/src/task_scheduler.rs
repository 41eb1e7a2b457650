//! 外部的任务调度器
//!
//! 这一层只需要两样东西：worker 的数量（用来给每个 worker 分配独立的 upload batch），
//! 以及一个可以把后台销毁任务扔进去的地方。

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

pub type GfxBackgroundJob = Box<dyn FnOnce() + Send + 'static>;

pub trait GfxTaskScheduler: Send + Sync {
    /// 录制阶段会并发调用的 worker 数量，worker index 的范围是 `0..worker_count`
    fn worker_count(&self) -> usize;

    /// 在后台执行 job，不保证执行的线程和时机
    fn submit_background(&self, job: GfxBackgroundJob);

    /// 阻塞直到所有已经提交的后台任务都执行完
    fn wait_idle(&self);
}

/// 在调用线程上立即执行后台任务
pub struct InlineTaskScheduler {
    worker_count: usize,
}
impl InlineTaskScheduler {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }
}
impl GfxTaskScheduler for InlineTaskScheduler {
    #[inline]
    fn worker_count(&self) -> usize {
        self.worker_count
    }

    #[inline]
    fn submit_background(&self, job: GfxBackgroundJob) {
        job();
    }

    #[inline]
    fn wait_idle(&self) {}
}

/// 还没有执行完的后台任务数量
#[derive(Default)]
struct InFlightJobs {
    count: Mutex<usize>,
    idle: Condvar,
}

/// 基于 rayon 线程池
pub struct RayonTaskScheduler {
    pool: rayon::ThreadPool,
    in_flight: Arc<InFlightJobs>,
}
// new & init
impl RayonTaskScheduler {
    pub fn new(worker_count: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count.max(1))
            .thread_name(|index| format!("Gfx-Worker-{}", index))
            .build()?;
        Ok(Self {
            pool,
            in_flight: Arc::new(InFlightJobs::default()),
        })
    }
}
impl Drop for RayonTaskScheduler {
    fn drop(&mut self) {
        self.wait_idle();
    }
}
// getters
impl RayonTaskScheduler {
    /// 录制阶段的并行任务也跑在这个线程池上
    #[inline]
    pub fn pool(&self) -> &rayon::ThreadPool {
        &self.pool
    }
}
impl GfxTaskScheduler for RayonTaskScheduler {
    #[inline]
    fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn submit_background(&self, job: GfxBackgroundJob) {
        *self.in_flight.count.lock() += 1;
        let in_flight = self.in_flight.clone();
        self.pool.spawn(move || {
            let _span = tracy_client::span!("GfxTaskScheduler::background_job");
            job();

            let mut count = in_flight.count.lock();
            *count -= 1;
            if *count == 0 {
                in_flight.idle.notify_all();
            }
        });
    }

    fn wait_idle(&self) {
        let mut count = self.in_flight.count.lock();
        while *count != 0 {
            self.in_flight.idle.wait(&mut count);
        }
    }
}
