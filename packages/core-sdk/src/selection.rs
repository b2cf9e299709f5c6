use crate::error::CoreError;
use crate::models::{ModelChoice, Settings};

/**
 * \brief 当前激活的 (Provider, 模型) 组合与缓存的 API Key。
 * \details api_key 是 Settings 中对应条目的缓存,切换 Provider 时刷新。
 *          激活的 Provider 被删除后由持有方负责清除选择,这里不做自动修复。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl SelectionState {
    /**
     * \brief 激活一个 (Provider, 模型) 组合,并从设置刷新 API Key。
     * \details Provider 未注册或模型不在其列表中返回 NotFound,原选择保持不变。
     */
    pub fn select(
        &mut self,
        provider: &str,
        model: &str,
        settings: &Settings,
    ) -> Result<(), CoreError> {
        if !settings.base_urls.contains_key(provider) {
            return Err(CoreError::NotFound(format!(
                "provider {} is not registered",
                provider
            )));
        }
        let offered = settings
            .models
            .get(provider)
            .map(|list| list.iter().any(|m| m == model))
            .unwrap_or(false);
        if !offered {
            return Err(CoreError::NotFound(format!(
                "model {} is not offered by provider {}",
                model, provider
            )));
        }
        self.provider = Some(provider.to_string());
        self.model = Some(model.to_string());
        self.api_key = settings.api_keys.get(provider).cloned();
        Ok(())
    }

    /** \brief 清除当前选择。 */
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /**
     * \brief 三项是否都已就绪。空字符串的 Key 视同未配置。
     */
    pub fn is_complete(&self) -> bool {
        fn filled(value: &Option<String>) -> bool {
            value.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
        }
        filled(&self.provider) && filled(&self.api_key) && filled(&self.model)
    }
}

/**
 * \brief 展平所有 Provider 的模型列表,Provider 顺序在先、模型顺序在后。
 */
pub fn list_available_models(settings: &Settings) -> Vec<ModelChoice> {
    let mut choices = Vec::new();
    for (provider, models) in &settings.models {
        for model in models {
            choices.push(ModelChoice {
                provider: provider.clone(),
                model: model.clone(),
            });
        }
    }
    choices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_settings() -> Settings {
        let mut settings = Settings::default();
        settings
            .base_urls
            .insert("P1".to_string(), "https://p1.example.com/v1".to_string());
        settings.api_keys.insert("P1".to_string(), "sk-1".to_string());
        settings
            .models
            .insert("P1".to_string(), vec!["a".to_string(), "b".to_string()]);
        settings
            .base_urls
            .insert("P2".to_string(), "https://p2.example.com/v1".to_string());
        settings.api_keys.insert("P2".to_string(), "sk-2".to_string());
        settings
            .models
            .insert("P2".to_string(), vec!["c".to_string()]);
        settings
    }

    #[test]
    fn test_list_available_models_flattens_in_registration_order() {
        let settings = sample_settings();
        let pairs: Vec<(String, String)> = list_available_models(&settings)
            .into_iter()
            .map(|c| (c.provider, c.model))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("P1".to_string(), "a".to_string()),
                ("P1".to_string(), "b".to_string()),
                ("P2".to_string(), "c".to_string()),
            ]
        );
    }

    #[test]
    fn test_select_refreshes_cached_key() {
        let settings = sample_settings();
        let mut selection = SelectionState::default();
        selection.select("P2", "c", &settings).expect("select P2/c");
        assert_eq!(selection.provider.as_deref(), Some("P2"));
        assert_eq!(selection.api_key.as_deref(), Some("sk-2"));
        assert_eq!(selection.model.as_deref(), Some("c"));
        assert!(selection.is_complete());
    }

    #[test]
    fn test_select_unknown_provider_keeps_previous_selection() {
        let settings = sample_settings();
        let mut selection = SelectionState::default();
        selection.select("P1", "a", &settings).expect("select P1/a");
        let err = selection.select("P3", "a", &settings).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert_eq!(selection.provider.as_deref(), Some("P1"));
    }

    #[test]
    fn test_select_unknown_model_is_rejected() {
        let settings = sample_settings();
        let mut selection = SelectionState::default();
        let err = selection.select("P1", "c", &settings).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert!(!selection.is_complete());
    }

    #[test]
    fn test_empty_cached_key_is_incomplete() {
        let mut settings = sample_settings();
        settings.api_keys.insert("P1".to_string(), String::new());
        let mut selection = SelectionState::default();
        selection.select("P1", "a", &settings).expect("select P1/a");
        assert!(!selection.is_complete());
    }
}
