pub mod admin;
pub mod chat;
pub mod error;
pub mod llm;
pub mod models;
pub mod selection;
pub mod server;
pub mod settings;
pub mod state;
pub mod telemetry;

/**
 * \brief SDK 预导入集合,方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::admin;
    pub use crate::chat;
    pub use crate::error;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::selection;
    pub use crate::server;
    pub use crate::settings;
    pub use crate::state;
    pub use crate::telemetry;
}
