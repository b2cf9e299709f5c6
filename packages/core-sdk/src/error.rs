use thiserror::Error;

/**
 * \brief SDK 统一错误分类。
 * \details 网络与远端故障不在此列:它们在 llm::run_turn 内部被归并成一条
 *          可见的助手错误消息,不会作为错误向外传播。
 */
#[derive(Debug, Error)]
pub enum CoreError {
    /** \brief 设置变更缺少必填字段,状态未被修改。 */
    #[error("invalid input: {0}")]
    Validation(String),

    /** \brief 选择引用了不存在的 Provider 或模型。 */
    #[error("not found: {0}")]
    NotFound(String),

    /** \brief 当前选择不完整,无法发起对话。 */
    #[error("incomplete configuration: {0}")]
    Configuration(String),

    /** \brief 设置文件不可读或不可写。 */
    #[error("settings persistence failed: {0}")]
    Persistence(String),
}
