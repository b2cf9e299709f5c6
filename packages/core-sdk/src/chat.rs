use crate::models::Message;

/**
 * \brief 会话转写:有序的聊天历史,仅驻留内存。
 * \details 进程退出即丢失。参考行为不持久化聊天历史,此限制被保留。
 *          除 clear 与 drop_last_if_assistant 外只允许追加。
 */
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    messages: Vec<Message>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /** \brief 追加一条消息到末尾。 */
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /** \brief 清空全部历史。 */
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /**
     * \brief 仅当末尾是助手消息时移除它,返回是否移除。
     * \details 重试动作先丢弃上一条回答,再用缩短后的历史重新生成。
     */
    pub fn drop_last_if_assistant(&mut self) -> bool {
        let is_assistant = self
            .messages
            .last()
            .map(|m| m.role == "assistant")
            .unwrap_or(false);
        if is_assistant {
            self.messages.pop();
        }
        is_assistant
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
