use sha2::{Digest, Sha256};

use crate::models::Settings;

/** \brief 空白安装使用的默认管理员口令。 */
const DEFAULT_ADMIN_SECRET: &str = "admin123";

/**
 * \brief 计算口令的小写十六进制 SHA-256 摘要。
 */
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/**
 * \brief 默认管理员口令的哈希,用于尚无设置文件的空白安装。
 */
pub fn default_secret_hash() -> String {
    hash_secret(DEFAULT_ADMIN_SECRET)
}

/**
 * \brief 校验候选口令,相等才允许调用方置位管理员标志。
 * \details 单管理员、本地文件的信任模型,不做锁定与限速。
 */
pub fn verify(candidate: &str, settings: &Settings) -> bool {
    hash_secret(candidate) == settings.admin_password
}
