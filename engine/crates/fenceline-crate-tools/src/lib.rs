//! Fenceline 工具集
//!
//! 目前只提供日志初始化，各个 crate 通过 `log` 门面输出日志。

pub mod init_log;
