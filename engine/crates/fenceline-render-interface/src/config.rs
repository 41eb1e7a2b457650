//! 初始化时固定下来的配置，运行时不允许修改

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败: {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("解析 TOML 配置失败: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("无效的配置: {0}")]
    Invalid(String),
}

/// 一个 descriptor heap 的容量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorHeapConfig {
    /// slot 的总数
    pub capacity: u32,
    /// 最大的 size class，必须是 2 的幂；超过它的分配直接从 heap 末尾线性分配
    pub block_size: u32,
}

impl DescriptorHeapConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(format!("{}.capacity must be positive", name)));
        }
        if !self.block_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "{}.block_size must be a power of two, got {}",
                name, self.block_size
            )));
        }
        if self.block_size > self.capacity {
            return Err(ConfigError::Invalid(format!(
                "{}.block_size ({}) is larger than capacity ({})",
                name, self.block_size, self.capacity
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuContextConfig {
    /// shader visible 的 heap，回收时需要等待 graphics queue
    pub shader_visible_heap: DescriptorHeapConfig,
    /// CPU-only 的 staging heap，回收时不需要等待 GPU
    pub cpu_heap: DescriptorHeapConfig,

    /// 共享 upload arena 的字节数
    pub upload_arena_size: u32,
    /// upload arena 同时存在的最大分配数量
    pub upload_arena_max_allocations: u32,

    /// upload batch 的数量，每个 worker 一个
    pub worker_count: usize,
    /// 是否额外创建 compute queue，upload batch 会优先使用它
    pub enable_compute_queue: bool,
}

impl Default for GpuContextConfig {
    fn default() -> Self {
        Self {
            shader_visible_heap: DescriptorHeapConfig {
                capacity: 64 * 1024,
                block_size: 64,
            },
            cpu_heap: DescriptorHeapConfig {
                capacity: 4 * 1024,
                block_size: 16,
            },
            upload_arena_size: 4 * 1024 * 1024,
            upload_arena_max_allocations: 4 * 1024,
            worker_count: 4,
            enable_compute_queue: true,
        }
    }
}

impl GpuContextConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GpuContextConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置，缺失的字段使用默认值
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shader_visible_heap.validate("shader_visible_heap")?;
        self.cpu_heap.validate("cpu_heap")?;
        if self.upload_arena_size == 0 {
            return Err(ConfigError::Invalid("upload_arena_size must be positive".to_string()));
        }
        if self.upload_arena_max_allocations == 0 {
            return Err(ConfigError::Invalid("upload_arena_max_allocations must be positive".to_string()));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be positive".to_string()));
        }
        Ok(())
    }
}
