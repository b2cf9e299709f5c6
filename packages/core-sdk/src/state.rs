use crate::admin;
use crate::chat::ChatSession;
use crate::error::CoreError;
use crate::selection::{self, SelectionState};
use crate::settings::SettingsStore;
use crate::telemetry;

/**
 * \brief 应用状态:设置仓库、当前选择、会话转写与管理员标志的聚合。
 * \details 进程启动时构建一次,显式传给各表现层,取代参考行为里的会话级
 *          全局变量。跨组件的不变量(删除激活 Provider 要清选择、轮换口令
 *          要强制重登录)集中在这里维护。
 */
#[derive(Debug)]
pub struct AppState {
    pub store: SettingsStore,
    pub selection: SelectionState,
    pub session: ChatSession,
    pub is_admin: bool,
}

impl AppState {
    /**
     * \brief 用已加载的仓库构建状态,并自动选中第一个可用的 (Provider, 模型)。
     */
    pub fn new(store: SettingsStore) -> Self {
        let mut state = Self {
            store,
            selection: SelectionState::default(),
            session: ChatSession::new(),
            is_admin: false,
        };
        state.select_first_available();
        state
    }

    fn select_first_available(&mut self) {
        if let Some(choice) = selection::list_available_models(&self.store.settings)
            .into_iter()
            .next()
        {
            let _ = self
                .selection
                .select(&choice.provider, &choice.model, &self.store.settings);
        }
    }

    /**
     * \brief 校验管理员口令,通过则置位会话标志。
     */
    pub fn login(&mut self, candidate: &str) -> bool {
        let ok = admin::verify(candidate, &self.store.settings);
        if ok {
            self.is_admin = true;
            telemetry::log_event("admin", "login ok");
        } else {
            telemetry::log_event("admin", "login rejected");
        }
        ok
    }

    /** \brief 注销管理员会话。 */
    pub fn logout(&mut self) {
        self.is_admin = false;
    }

    /**
     * \brief 新增或覆盖 Provider;首个注册的 Provider 自动成为当前选择。
     */
    pub fn upsert_provider(
        &mut self,
        name: &str,
        base_url: &str,
        api_key: &str,
        models: Vec<String>,
    ) -> Result<(), CoreError> {
        self.store.upsert_provider(name, base_url, api_key, models)?;
        telemetry::log_event("settings", &format!("upsert provider {}", name));
        if self.store.settings.base_urls.len() == 1 {
            self.select_first_available();
        }
        Ok(())
    }

    /**
     * \brief 删除 Provider;若删除的是当前激活者,同时清除选择。
     */
    pub fn delete_provider(&mut self, name: &str) -> Result<(), CoreError> {
        self.store.delete_provider(name)?;
        telemetry::log_event("settings", &format!("delete provider {}", name));
        if self.selection.provider.as_deref() == Some(name) {
            self.selection.clear();
        }
        Ok(())
    }

    /**
     * \brief 轮换管理员口令并强制重新登录。
     */
    pub fn set_admin_secret(&mut self, new_secret: &str) -> Result<(), CoreError> {
        self.store.set_admin_secret(new_secret)?;
        self.is_admin = false;
        telemetry::log_event("admin", "secret rotated");
        Ok(())
    }

    /** \brief 切换当前 (Provider, 模型)。 */
    pub fn select(&mut self, provider: &str, model: &str) -> Result<(), CoreError> {
        self.selection.select(provider, model, &self.store.settings)
    }

    /** \brief 清空聊天历史。 */
    pub fn clear_chat(&mut self) {
        self.session.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_in(dir: &tempfile::TempDir) -> AppState {
        AppState::new(SettingsStore::open(dir.path().join("settings.json")))
    }

    #[test]
    fn test_login_toggles_admin_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = app_in(&dir);
        assert!(!app.is_admin);
        assert!(!app.login("wrong"));
        assert!(!app.is_admin);
        assert!(app.login("admin123"));
        assert!(app.is_admin);
        app.logout();
        assert!(!app.is_admin);
    }

    #[test]
    fn test_secret_rotation_forces_relogin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = app_in(&dir);
        assert!(app.login("admin123"));
        app.set_admin_secret("hunter2").expect("rotate secret");
        assert!(!app.is_admin);
        assert!(!app.login("admin123"));
        assert!(app.login("hunter2"));
    }

    #[test]
    fn test_first_provider_is_selected_automatically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = app_in(&dir);
        app.upsert_provider(
            "p1",
            "https://api.example.com/v1",
            "sk-1",
            vec!["m1".to_string(), "m2".to_string()],
        )
        .expect("upsert p1");
        assert_eq!(app.selection.provider.as_deref(), Some("p1"));
        assert_eq!(app.selection.model.as_deref(), Some("m1"));
        assert_eq!(app.selection.api_key.as_deref(), Some("sk-1"));

        // 第二个 Provider 不抢占既有选择
        app.upsert_provider("p2", "https://p2.example.com/v1", "sk-2", vec!["x".to_string()])
            .expect("upsert p2");
        assert_eq!(app.selection.provider.as_deref(), Some("p1"));
    }

    #[test]
    fn test_deleting_active_provider_clears_selection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = app_in(&dir);
        app.upsert_provider("p1", "https://api.example.com/v1", "sk", vec!["m1".to_string()])
            .expect("upsert p1");
        assert!(app.selection.is_complete());
        app.delete_provider("p1").expect("delete p1");
        assert_eq!(app.selection, SelectionState::default());
    }

    #[test]
    fn test_deleting_other_provider_keeps_selection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = app_in(&dir);
        app.upsert_provider("p1", "https://api.example.com/v1", "sk", vec!["m1".to_string()])
            .expect("upsert p1");
        app.upsert_provider("p2", "https://p2.example.com/v1", "sk", vec!["x".to_string()])
            .expect("upsert p2");
        app.delete_provider("p2").expect("delete p2");
        assert_eq!(app.selection.provider.as_deref(), Some("p1"));
    }

    #[test]
    fn test_state_restored_from_saved_settings_on_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut app = app_in(&dir);
            app.upsert_provider("p1", "https://api.example.com/v1", "sk", vec!["m1".to_string()])
                .expect("upsert p1");
        }
        let mut store = SettingsStore::open(dir.path().join("settings.json"));
        store.load().expect("load");
        let app = AppState::new(store);
        assert_eq!(app.selection.provider.as_deref(), Some("p1"));
        assert_eq!(app.selection.model.as_deref(), Some("m1"));
    }
}
