//! 实时聊天后端的核心领域模型
//!
//! 包含账户、消息、通知等实体，标识符值对象，以及持久化协作方的接口定义。

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use repositories::*;
pub use value_objects::*;
