use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::admin;
use crate::error::CoreError;
use crate::models::Settings;

/** \brief 默认设置文件,位于工作目录(与既有部署的文件名保持一致)。 */
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

/**
 * \brief 设置仓库:内存中的 Settings 加持久化位置。
 * \details 每次变更(增删 Provider、轮换管理员口令)后整文件覆写,
 *          没有增量写入,其他操作不会看到半份文件。
 */
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    pub settings: Settings,
}

impl SettingsStore {
    /** \brief 以指定路径创建仓库,初始为空白默认设置。 */
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            settings: Settings::default(),
        }
    }

    /** \brief 使用工作目录下的 settings.json。 */
    pub fn open_default() -> Self {
        Self::open(DEFAULT_SETTINGS_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /**
     * \brief 从磁盘读入设置,文件缺失时保留空白默认。
     * \details 读取或解析失败返回 Persistence,内存内容保持原值,绝不让进程
     *          崩溃。文件里缺失的字段(含口令哈希)由 serde 默认值补齐。
     */
    pub fn load(&mut self) -> Result<(), CoreError> {
        if !self.path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            CoreError::Persistence(format!("read {} failed: {}", self.path.display(), e))
        })?;
        self.settings = serde_json::from_str(&raw).map_err(|e| {
            CoreError::Persistence(format!("parse {} failed: {}", self.path.display(), e))
        })?;
        Ok(())
    }

    /**
     * \brief 原子覆写整份设置:先写同目录临时文件,再重命名到位。
     * \details 三张映射与口令哈希总是整体写出,调用方未触碰的字段也随之保留。
     */
    pub fn save(&self) -> Result<(), CoreError> {
        let parent = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let payload = serde_json::to_vec_pretty(&self.settings)
            .map_err(|e| CoreError::Persistence(format!("serialize settings failed: {}", e)))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| {
            CoreError::Persistence(format!("create temp file in {} failed: {}", parent.display(), e))
        })?;
        tmp.write_all(&payload).map_err(|e| {
            CoreError::Persistence(format!("write temp settings failed: {}", e))
        })?;
        tmp.persist(&self.path).map_err(|e| {
            CoreError::Persistence(format!("replace {} failed: {}", self.path.display(), e))
        })?;
        Ok(())
    }

    /**
     * \brief 新增或整体覆盖一个 Provider 的三项配置并持久化。
     * \param models 模型列表,保持给出的顺序
     */
    pub fn upsert_provider(
        &mut self,
        name: &str,
        base_url: &str,
        api_key: &str,
        models: Vec<String>,
    ) -> Result<(), CoreError> {
        if name.is_empty() || base_url.is_empty() {
            return Err(CoreError::Validation(
                "provider name and base URL cannot be empty".to_string(),
            ));
        }
        self.settings
            .base_urls
            .insert(name.to_string(), base_url.to_string());
        self.settings
            .api_keys
            .insert(name.to_string(), api_key.to_string());
        self.settings.models.insert(name.to_string(), models);
        self.save()
    }

    /**
     * \brief 从三张映射中一并移除一个 Provider(不存在则为空操作)并持久化。
     */
    pub fn delete_provider(&mut self, name: &str) -> Result<(), CoreError> {
        self.settings.base_urls.shift_remove(name);
        self.settings.api_keys.shift_remove(name);
        self.settings.models.shift_remove(name);
        self.save()
    }

    /**
     * \brief 轮换管理员口令哈希并持久化。
     * \details 调用方必须同时复位管理员会话标志,强制重新登录。
     */
    pub fn set_admin_secret(&mut self, new_secret: &str) -> Result<(), CoreError> {
        if new_secret.is_empty() {
            return Err(CoreError::Validation(
                "new admin secret cannot be empty".to_string(),
            ));
        }
        self.settings.admin_password = admin::hash_secret(new_secret);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::open(dir.path().join("settings.json"))
    }

    #[test]
    fn test_save_load_round_trips_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(&dir);
        store
            .upsert_provider(
                "openai",
                "https://api.openai.com/v1",
                "sk-1",
                vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
            )
            .expect("upsert openai");
        store
            .upsert_provider("local", "http://localhost:8000/v1", "", vec![])
            .expect("upsert local");
        store.set_admin_secret("hunter2").expect("rotate secret");
        store.delete_provider("local").expect("delete local");

        let mut reloaded = store_in(&dir);
        reloaded.load().expect("load");
        assert_eq!(reloaded.settings, store.settings);
        assert_eq!(
            reloaded.settings.admin_password,
            admin::hash_secret("hunter2")
        );
    }

    #[test]
    fn test_load_missing_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(&dir);
        store.load().expect("load absent file");
        assert_eq!(store.settings, Settings::default());
    }

    #[test]
    fn test_load_corrupt_file_reports_and_keeps_prior_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").expect("write corrupt file");
        let mut store = SettingsStore::open(&path);
        let err = store.load().unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));
        assert_eq!(store.settings, Settings::default());
    }

    #[test]
    fn test_upsert_rejects_empty_required_fields_before_mutating() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(&dir);
        let err = store
            .upsert_provider("", "https://api.example.com/v1", "sk", vec![])
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        let err = store.upsert_provider("p1", "", "sk", vec![]).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(store.settings.base_urls.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_delete_absent_provider_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(&dir);
        store
            .upsert_provider("p1", "https://api.example.com/v1", "sk", vec![])
            .expect("upsert p1");
        store.delete_provider("ghost").expect("delete absent");
        assert_eq!(store.settings.base_urls.len(), 1);
    }

    #[test]
    fn test_delete_removes_all_three_maps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(&dir);
        store
            .upsert_provider(
                "p1",
                "https://api.example.com/v1",
                "sk",
                vec!["m1".to_string()],
            )
            .expect("upsert p1");
        store.delete_provider("p1").expect("delete p1");
        assert!(store.settings.base_urls.is_empty());
        assert!(store.settings.api_keys.is_empty());
        assert!(store.settings.models.is_empty());
    }

    #[test]
    fn test_set_admin_secret_rejects_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(&dir);
        let before = store.settings.admin_password.clone();
        let err = store.set_admin_secret("").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(store.settings.admin_password, before);
    }

    #[test]
    fn test_saved_file_has_four_top_level_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(&dir);
        store
            .upsert_provider(
                "p1",
                "https://api.example.com/v1",
                "sk",
                vec!["m1".to_string()],
            )
            .expect("upsert p1");
        let raw = std::fs::read_to_string(store.path()).expect("read settings.json");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("parse settings.json");
        let object = value.as_object().expect("top level object");
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["admin_password", "api_keys", "base_urls", "models"]);
    }
}
