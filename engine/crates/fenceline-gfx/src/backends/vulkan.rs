//! 基于 ash + vk-mem 的后端
//!
//! - fence 使用 timeline semaphore
//! - command allocator 对应 `vk::CommandPool`，command list 对应从 pool 中分配的 `vk::CommandBuffer`
//! - descriptor heap 对应一个 UPDATE_AFTER_BIND 的 bindless descriptor set，slot 以数组下标寻址
//!
//! instance / device / queue 由外部创建，这里只借用；VMA 由 backend 自己持有。

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use ash::vk;
use parking_lot::Mutex;
use vk_mem::Alloc;

use crate::{
    GfxError, GfxResult,
    foundation::{
        backend::GfxBackend,
        handles::{
            MappedPtr, RawBuffer, RawCommandAllocator, RawCommandList, RawDescriptorHeap, RawFence, RawHeap,
            RawTexture,
        },
        queue_kind::GfxQueueKind,
    },
    resources::{
        GfxMemoryLocation,
        buffer::{GfxBufferAllocation, GfxBufferDesc, GfxBufferUsage},
        descriptor_heap::{GfxDescriptorHeapDesc, GfxDescriptorHeapInfo, GfxDescriptorKind},
        heap::GfxHeapDesc,
        texture::{GfxFormat, GfxTextureDesc, GfxTextureUsage},
    },
};

/// 外部创建好的 queue
#[derive(Copy, Clone, Debug)]
pub struct VulkanQueueInfo {
    pub queue: vk::Queue,
    pub family_index: u32,
}

struct VulkanQueue {
    /// vkQueueSubmit 要求外部同步
    queue: Mutex<vk::Queue>,
    family_index: u32,
}

struct VulkanCommandPool {
    pool: vk::CommandPool,
    queue: GfxQueueKind,
    /// 已经不再被任何 command list 引用的 command buffer，reset pool 之后可以复用
    retired: Vec<vk::CommandBuffer>,
    /// reset 过，可以直接拿来录制的 command buffer
    free: Vec<vk::CommandBuffer>,
}

struct VulkanCommandList {
    command_buffer: vk::CommandBuffer,
    pool: RawCommandAllocator,
    queue: GfxQueueKind,
}

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    mapped: bool,
}

struct VulkanImage {
    image: vk::Image,
    allocation: vk_mem::Allocation,
}

struct VulkanDescriptorHeap {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

#[derive(Default)]
struct VulkanObjects {
    semaphores: HashMap<u64, vk::Semaphore>,
    command_pools: HashMap<u64, VulkanCommandPool>,
    command_lists: HashMap<u64, VulkanCommandList>,
    buffers: HashMap<u64, VulkanBuffer>,
    images: HashMap<u64, VulkanImage>,
    memories: HashMap<u64, vk_mem::Allocation>,
    descriptor_heaps: HashMap<u64, VulkanDescriptorHeap>,
}

// SAFETY: 所有的 vk 句柄和 VMA allocation 都只在持有 Mutex 时访问
unsafe impl Send for VulkanObjects {}

pub struct VulkanBackend {
    device: ash::Device,
    vma: vk_mem::Allocator,

    graphics: VulkanQueue,
    compute: Option<VulkanQueue>,

    next_id: AtomicU64,
    objects: Mutex<VulkanObjects>,
}

// init & destroy
impl VulkanBackend {
    /// 由于 vma 的生命周期设定：需要引用 Instance 以及 Device，
    /// 调用者需要保证 backend 销毁之前 instance 和 device 一直有效
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        device: ash::Device,
        graphics: VulkanQueueInfo,
        compute: Option<VulkanQueueInfo>,
    ) -> GfxResult<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, &device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let vma = unsafe { vk_mem::Allocator::new(vma_ci)? };

        let make_queue = |info: VulkanQueueInfo| VulkanQueue {
            queue: Mutex::new(info.queue),
            family_index: info.family_index,
        };

        Ok(Self {
            graphics: make_queue(graphics),
            compute: compute.map(make_queue),
            device,
            vma,
            next_id: AtomicU64::new(1),
            objects: Mutex::new(VulkanObjects::default()),
        })
    }
}
impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed when dropping VulkanBackend: {:?}", e);
            }
        }

        let objects = self.objects.get_mut();
        let leaked = objects.semaphores.len()
            + objects.command_pools.len()
            + objects.command_lists.len()
            + objects.buffers.len()
            + objects.images.len()
            + objects.memories.len()
            + objects.descriptor_heaps.len();
        if leaked != 0 {
            log::warn!("VulkanBackend dropped with {} live objects, destroying them now", leaked);
        }

        unsafe {
            for (_, semaphore) in objects.semaphores.drain() {
                self.device.destroy_semaphore(semaphore, None);
            }
            objects.command_lists.clear();
            for (_, pool) in objects.command_pools.drain() {
                self.device.destroy_command_pool(pool.pool, None);
            }
            for (_, mut buffer) in objects.buffers.drain() {
                if buffer.mapped {
                    self.vma.unmap_memory(&mut buffer.allocation);
                }
                self.vma.destroy_buffer(buffer.buffer, &mut buffer.allocation);
            }
            for (_, mut image) in objects.images.drain() {
                self.vma.destroy_image(image.image, &mut image.allocation);
            }
            for (_, mut memory) in objects.memories.drain() {
                self.vma.free_memory(&mut memory);
            }
            for (_, heap) in objects.descriptor_heaps.drain() {
                self.device.destroy_descriptor_pool(heap.pool, None);
                self.device.destroy_descriptor_set_layout(heap.layout, None);
            }
        }
    }
}
// tools
impl VulkanBackend {
    #[inline]
    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn queue(&self, kind: GfxQueueKind) -> GfxResult<&VulkanQueue> {
        match kind {
            GfxQueueKind::Graphics => Ok(&self.graphics),
            GfxQueueKind::Compute => {
                self.compute.as_ref().ok_or_else(|| GfxError::Backend("compute queue is not available".to_string()))
            }
        }
    }

    fn semaphore(&self, fence: RawFence) -> GfxResult<vk::Semaphore> {
        self.objects
            .lock()
            .semaphores
            .get(&fence.as_raw())
            .copied()
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", fence)))
    }

    fn submit(&self, kind: GfxQueueKind, submit_info: &vk::SubmitInfo2) -> GfxResult<()> {
        let queue = self.queue(kind)?;
        let queue = queue.queue.lock();
        unsafe {
            self.device.queue_submit2(*queue, std::slice::from_ref(submit_info), vk::Fence::null())?;
        }
        Ok(())
    }

    fn begin(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info)? };
        Ok(())
    }

    /// 从 pool 中取一个可以录制的 command buffer
    fn acquire_command_buffer(&self, pool: &mut VulkanCommandPool) -> GfxResult<vk::CommandBuffer> {
        if let Some(command_buffer) = pool.free.pop() {
            return Ok(command_buffer);
        }
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe { self.device.allocate_command_buffers(&allocate_info)? };
        command_buffers.into_iter().next().ok_or(GfxError::OutOfHostMemory)
    }

    fn memory_usage(memory: GfxMemoryLocation) -> vk_mem::AllocationCreateInfo {
        match memory {
            GfxMemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            GfxMemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            GfxMemoryLocation::GpuToCpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                ..Default::default()
            },
        }
    }

    fn buffer_usage(usage: GfxBufferUsage) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if usage.contains(GfxBufferUsage::TRANSFER_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if usage.contains(GfxBufferUsage::TRANSFER_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if usage.contains(GfxBufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if usage.contains(GfxBufferUsage::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if usage.contains(GfxBufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if usage.contains(GfxBufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        flags
    }

    fn image_usage(usage: GfxTextureUsage) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if usage.contains(GfxTextureUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if usage.contains(GfxTextureUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if usage.contains(GfxTextureUsage::RENDER_TARGET) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if usage.contains(GfxTextureUsage::DEPTH_STENCIL) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if usage.contains(GfxTextureUsage::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if usage.contains(GfxTextureUsage::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        flags
    }

    fn format(format: GfxFormat) -> vk::Format {
        match format {
            GfxFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            GfxFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            GfxFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            GfxFormat::R32Uint => vk::Format::R32_UINT,
            GfxFormat::D32Float => vk::Format::D32_SFLOAT,
        }
    }

    fn descriptor_type(kind: GfxDescriptorKind) -> vk::DescriptorType {
        match kind {
            GfxDescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            GfxDescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            GfxDescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            GfxDescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
        }
    }
}

impl GfxBackend for VulkanBackend {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn has_queue(&self, queue: GfxQueueKind) -> bool {
        match queue {
            GfxQueueKind::Graphics => true,
            GfxQueueKind::Compute => self.compute.is_some(),
        }
    }

    fn create_fence(&self, initial_value: u64, _debug_name: &str) -> GfxResult<RawFence> {
        let mut timeline_type_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let timeline_semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
        let semaphore = unsafe { self.device.create_semaphore(&timeline_semaphore_ci, None)? };

        let id = self.alloc_id();
        self.objects.lock().semaphores.insert(id, semaphore);
        Ok(RawFence::from_raw(id))
    }

    fn destroy_fence(&self, fence: RawFence) {
        if let Some(semaphore) = self.objects.lock().semaphores.remove(&fence.as_raw()) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn fence_completed_value(&self, fence: RawFence) -> GfxResult<u64> {
        let semaphore = self.semaphore(fence)?;
        Ok(unsafe { self.device.get_semaphore_counter_value(semaphore)? })
    }

    fn wait_fence(&self, fence: RawFence, value: u64) -> GfxResult<()> {
        let semaphore = self.semaphore(fence)?;
        let wait_semaphore = [semaphore];
        let wait_info =
            vk::SemaphoreWaitInfo::default().semaphores(&wait_semaphore).values(std::slice::from_ref(&value));
        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX)? };
        Ok(())
    }

    fn queue_signal(&self, queue: GfxQueueKind, fence: RawFence, value: u64) -> GfxResult<()> {
        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore(fence)?)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .value(value);
        let submit_info = vk::SubmitInfo2::default().signal_semaphore_infos(std::slice::from_ref(&signal_info));
        self.submit(queue, &submit_info)
    }

    fn queue_wait(&self, queue: GfxQueueKind, fence: RawFence, value: u64) -> GfxResult<()> {
        let wait_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore(fence)?)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .value(value);
        let submit_info = vk::SubmitInfo2::default().wait_semaphore_infos(std::slice::from_ref(&wait_info));
        self.submit(queue, &submit_info)
    }

    fn queue_execute(&self, queue: GfxQueueKind, command_lists: &[RawCommandList]) -> GfxResult<()> {
        let command_buffer_infos = {
            let objects = self.objects.lock();
            command_lists
                .iter()
                .map(|list| {
                    objects
                        .command_lists
                        .get(&list.as_raw())
                        .map(|list| vk::CommandBufferSubmitInfo::default().command_buffer(list.command_buffer))
                        .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", list)))
                })
                .collect::<GfxResult<Vec<_>>>()?
        };
        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&command_buffer_infos);
        self.submit(queue, &submit_info)
    }

    fn create_command_allocator(&self, queue: GfxQueueKind, _debug_name: &str) -> GfxResult<RawCommandAllocator> {
        let family_index = self.queue(queue)?.family_index;
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { self.device.create_command_pool(&pool_ci, None)? };

        let id = self.alloc_id();
        self.objects.lock().command_pools.insert(
            id,
            VulkanCommandPool {
                pool,
                queue,
                retired: Vec::new(),
                free: Vec::new(),
            },
        );
        Ok(RawCommandAllocator::from_raw(id))
    }

    fn reset_command_allocator(&self, allocator: RawCommandAllocator) -> GfxResult<()> {
        let mut objects = self.objects.lock();
        let pool = objects
            .command_pools
            .get_mut(&allocator.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", allocator)))?;
        unsafe { self.device.reset_command_pool(pool.pool, vk::CommandPoolResetFlags::empty())? };
        let retired = std::mem::take(&mut pool.retired);
        pool.free.extend(retired);
        Ok(())
    }

    fn destroy_command_allocator(&self, allocator: RawCommandAllocator) {
        if let Some(pool) = self.objects.lock().command_pools.remove(&allocator.as_raw()) {
            // pool 中的 command buffer 会一起被释放
            unsafe { self.device.destroy_command_pool(pool.pool, None) };
        }
    }

    fn create_command_list(
        &self,
        queue: GfxQueueKind,
        allocator: RawCommandAllocator,
        _debug_name: &str,
    ) -> GfxResult<RawCommandList> {
        let mut objects = self.objects.lock();
        let pool = objects
            .command_pools
            .get_mut(&allocator.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", allocator)))?;
        debug_assert_eq!(pool.queue, queue);
        let command_buffer = self.acquire_command_buffer(pool)?;
        self.begin(command_buffer)?;

        let id = self.alloc_id();
        objects.command_lists.insert(
            id,
            VulkanCommandList {
                command_buffer,
                pool: allocator,
                queue,
            },
        );
        Ok(RawCommandList::from_raw(id))
    }

    fn reset_command_list(&self, command_list: RawCommandList, allocator: RawCommandAllocator) -> GfxResult<()> {
        let mut objects = self.objects.lock();
        let objects = &mut *objects;
        let list = objects
            .command_lists
            .get_mut(&command_list.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", command_list)))?;

        // 旧的 command buffer 可能还在 GPU 上执行，等旧 pool 被 reset 之后才能复用
        if let Some(old_pool) = objects.command_pools.get_mut(&list.pool.as_raw()) {
            old_pool.retired.push(list.command_buffer);
        }

        let pool = objects
            .command_pools
            .get_mut(&allocator.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", allocator)))?;
        debug_assert_eq!(pool.queue, list.queue);
        let command_buffer = self.acquire_command_buffer(pool)?;
        self.begin(command_buffer)?;

        list.command_buffer = command_buffer;
        list.pool = allocator;
        Ok(())
    }

    fn close_command_list(&self, command_list: RawCommandList) -> GfxResult<()> {
        let objects = self.objects.lock();
        let list = objects
            .command_lists
            .get(&command_list.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", command_list)))?;
        unsafe { self.device.end_command_buffer(list.command_buffer)? };
        Ok(())
    }

    fn destroy_command_list(&self, command_list: RawCommandList) {
        let mut objects = self.objects.lock();
        if let Some(list) = objects.command_lists.remove(&command_list.as_raw()) {
            if let Some(pool) = objects.command_pools.get_mut(&list.pool.as_raw()) {
                pool.retired.push(list.command_buffer);
            }
        }
    }

    fn cmd_copy_buffer(
        &self,
        command_list: RawCommandList,
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_offset: u64,
        size: u64,
    ) -> GfxResult<()> {
        let objects = self.objects.lock();
        let list = objects
            .command_lists
            .get(&command_list.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", command_list)))?;
        let src = objects
            .buffers
            .get(&src.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", src)))?;
        let dst = objects
            .buffers
            .get(&dst.as_raw())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", dst)))?;
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(list.command_buffer, src.buffer, dst.buffer, std::slice::from_ref(&region));
        }
        Ok(())
    }

    fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<GfxBufferAllocation> {
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(Self::buffer_usage(desc.usage));
        let alloc_ci = Self::memory_usage(desc.memory);
        let (buffer, mut allocation) = unsafe { self.vma.create_buffer(&buffer_ci, &alloc_ci)? };

        let mapped = if desc.memory.is_host_visible() {
            match unsafe { self.vma.map_memory(&mut allocation) } {
                Ok(ptr) => MappedPtr::new(ptr),
                Err(e) => {
                    unsafe { self.vma.destroy_buffer(buffer, &mut allocation) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let id = self.alloc_id();
        self.objects.lock().buffers.insert(
            id,
            VulkanBuffer {
                buffer,
                allocation,
                mapped: mapped.is_some(),
            },
        );
        Ok(GfxBufferAllocation {
            raw: RawBuffer::from_raw(id),
            mapped,
        })
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        if let Some(mut buffer) = self.objects.lock().buffers.remove(&buffer.as_raw()) {
            unsafe {
                if buffer.mapped {
                    self.vma.unmap_memory(&mut buffer.allocation);
                }
                self.vma.destroy_buffer(buffer.buffer, &mut buffer.allocation);
            }
        }
    }

    fn create_texture(&self, desc: &GfxTextureDesc) -> GfxResult<RawTexture> {
        let image_type = if desc.depth > 1 { vk::ImageType::TYPE_3D } else { vk::ImageType::TYPE_2D };
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(Self::format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(Self::image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = Self::memory_usage(GfxMemoryLocation::GpuOnly);
        let (image, allocation) = unsafe { self.vma.create_image(&image_ci, &alloc_ci)? };

        let id = self.alloc_id();
        self.objects.lock().images.insert(id, VulkanImage { image, allocation });
        Ok(RawTexture::from_raw(id))
    }

    fn destroy_texture(&self, texture: RawTexture) {
        if let Some(mut image) = self.objects.lock().images.remove(&texture.as_raw()) {
            unsafe { self.vma.destroy_image(image.image, &mut image.allocation) };
        }
    }

    fn create_heap(&self, desc: &GfxHeapDesc) -> GfxResult<RawHeap> {
        let requirements = vk::MemoryRequirements {
            size: desc.size,
            alignment: 64 * 1024,
            memory_type_bits: u32::MAX,
        };
        let required_flags = if desc.memory.is_host_visible() {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Unknown,
            required_flags,
            ..Default::default()
        };
        let allocation = unsafe { self.vma.allocate_memory(&requirements, &alloc_ci)? };

        let id = self.alloc_id();
        self.objects.lock().memories.insert(id, allocation);
        Ok(RawHeap::from_raw(id))
    }

    fn destroy_heap(&self, heap: RawHeap) {
        if let Some(mut allocation) = self.objects.lock().memories.remove(&heap.as_raw()) {
            unsafe { self.vma.free_memory(&mut allocation) };
        }
    }

    fn create_descriptor_heap(&self, desc: &GfxDescriptorHeapDesc) -> GfxResult<GfxDescriptorHeapInfo> {
        let descriptor_type = Self::descriptor_type(desc.kind);

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(descriptor_type)
            .descriptor_count(desc.capacity)
            .stage_flags(vk::ShaderStageFlags::ALL)];
        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING];
        let mut binding_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut binding_flags_ci);
        let layout = unsafe { self.device.create_descriptor_set_layout(&layout_ci, None)? };

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: desc.capacity,
        }];
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1)
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND);
        let pool = match unsafe { self.device.create_descriptor_pool(&pool_ci, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
                return Err(e.into());
            }
        };

        let layouts = [layout];
        let set_ai = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&layouts);
        let set = match unsafe { self.device.allocate_descriptor_sets(&set_ai) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe {
                    self.device.destroy_descriptor_pool(pool, None);
                    self.device.destroy_descriptor_set_layout(layout, None);
                }
                return Err(e.into());
            }
        };

        let id = self.alloc_id();
        self.objects.lock().descriptor_heaps.insert(id, VulkanDescriptorHeap { layout, pool, set });
        Ok(GfxDescriptorHeapInfo {
            raw: RawDescriptorHeap::from_raw(id),
            cpu_base: 0,
            gpu_base: desc.shader_visible.then_some(0),
            increment: 1,
        })
    }

    fn destroy_descriptor_heap(&self, heap: RawDescriptorHeap) {
        if let Some(heap) = self.objects.lock().descriptor_heaps.remove(&heap.as_raw()) {
            log::debug!("destroy descriptor heap, set {:?}", heap.set);
            unsafe {
                self.device.destroy_descriptor_pool(heap.pool, None);
                self.device.destroy_descriptor_set_layout(heap.layout, None);
            }
        }
    }
}
