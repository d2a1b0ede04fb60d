// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod buffer;
pub mod density;
pub mod error;
pub mod extract;
pub mod instrument;
pub mod pipeline;
pub mod script;
pub mod sweep;
pub mod variants;
// 公开导出常用类型，方便外部调用
pub use error::{ErrorKind, MeasurementError};
