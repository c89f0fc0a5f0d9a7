//! Closed set of plugin lifecycle hooks
//!
//! Every hook the host can raise is a [`Hook`] variant carrying its own typed
//! arguments. Plugins implement [`PluginHooks`], overriding only the methods
//! they care about; [`dispatch`] routes a hook to the matching method.
//! [`HookRegistry`] fans a hook out to every registered plugin and isolates
//! failures so one misbehaving plugin never stops the rest.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{PluginError, PluginResult};

/// A lifecycle hook and its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "snake_case")]
pub enum Hook {
    Load,
    Enable,
    Disable,
    Unload,
    /// A panel contributed by the plugin was mounted
    Mount { panel_id: String },
    ContentChange { document_id: String, content: String },
    ConfigChange { config: Value },
    BeforeReload,
    AfterReload { success: bool },
}

/// Argument-free discriminant of a [`Hook`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Load,
    Enable,
    Disable,
    Unload,
    Mount,
    ContentChange,
    ConfigChange,
    BeforeReload,
    AfterReload,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "on_load",
            Self::Enable => "on_enable",
            Self::Disable => "on_disable",
            Self::Unload => "on_unload",
            Self::Mount => "on_mount",
            Self::ContentChange => "on_content_change",
            Self::ConfigChange => "on_config_change",
            Self::BeforeReload => "on_before_reload",
            Self::AfterReload => "on_after_reload",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Hook {
    pub fn kind(&self) -> HookKind {
        match self {
            Self::Load => HookKind::Load,
            Self::Enable => HookKind::Enable,
            Self::Disable => HookKind::Disable,
            Self::Unload => HookKind::Unload,
            Self::Mount { .. } => HookKind::Mount,
            Self::ContentChange { .. } => HookKind::ContentChange,
            Self::ConfigChange { .. } => HookKind::ConfigChange,
            Self::BeforeReload => HookKind::BeforeReload,
            Self::AfterReload { .. } => HookKind::AfterReload,
        }
    }
}

/// Hook receiver implemented by plugins. All methods default to no-ops.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    fn plugin_id(&self) -> &str;

    async fn on_load(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_enable(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_disable(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_unload(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_mount(&self, _panel_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_content_change(&self, _document_id: &str, _content: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_config_change(&self, _config: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_before_reload(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_after_reload(&self, _success: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Route `hook` to the matching method of `plugin`.
pub async fn dispatch(plugin: &dyn PluginHooks, hook: &Hook) -> anyhow::Result<()> {
    match hook {
        Hook::Load => plugin.on_load().await,
        Hook::Enable => plugin.on_enable().await,
        Hook::Disable => plugin.on_disable().await,
        Hook::Unload => plugin.on_unload().await,
        Hook::Mount { panel_id } => plugin.on_mount(panel_id).await,
        Hook::ContentChange {
            document_id,
            content,
        } => plugin.on_content_change(document_id, content).await,
        Hook::ConfigChange { config } => plugin.on_config_change(config).await,
        Hook::BeforeReload => plugin.on_before_reload().await,
        Hook::AfterReload { success } => plugin.on_after_reload(*success).await,
    }
}

/// Result of running one hook on one plugin
#[derive(Debug)]
pub struct HookOutcome {
    pub plugin_id: String,
    pub hook: HookKind,
    pub result: PluginResult<()>,
}

impl HookOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Readable text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Ordered set of hook receivers
#[derive(Default)]
pub struct HookRegistry {
    plugins: RwLock<Vec<Arc<dyn PluginHooks>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receiver. A receiver with the same id is replaced in place
    /// and returned.
    pub fn register(&self, plugin: Arc<dyn PluginHooks>) -> Option<Arc<dyn PluginHooks>> {
        let mut plugins = self.plugins.write();
        match plugins.iter().position(|p| p.plugin_id() == plugin.plugin_id()) {
            Some(index) => Some(std::mem::replace(&mut plugins[index], plugin)),
            None => {
                plugins.push(plugin);
                None
            }
        }
    }

    pub fn unregister(&self, plugin_id: &str) -> Option<Arc<dyn PluginHooks>> {
        let mut plugins = self.plugins.write();
        let index = plugins.iter().position(|p| p.plugin_id() == plugin_id)?;
        Some(plugins.remove(index))
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.plugins.read().iter().any(|p| p.plugin_id() == plugin_id)
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// Run `hook` on every registered plugin in registration order.
    pub async fn execute(&self, hook: &Hook) -> Vec<HookOutcome> {
        let snapshot: Vec<_> = self.plugins.read().clone();
        debug!(hook = %hook.kind(), plugins = snapshot.len(), "Executing hook");

        let mut outcomes = Vec::with_capacity(snapshot.len());
        for plugin in snapshot {
            outcomes.push(run(plugin, hook).await);
        }
        outcomes
    }

    /// Run `hook` on a single plugin.
    pub async fn execute_for(&self, plugin_id: &str, hook: &Hook) -> PluginResult<()> {
        let plugin = self
            .plugins
            .read()
            .iter()
            .find(|p| p.plugin_id() == plugin_id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;

        run(plugin, hook).await.result
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self
            .plugins
            .read()
            .iter()
            .map(|p| p.plugin_id().to_string())
            .collect();
        f.debug_struct("HookRegistry").field("plugins", &ids).finish()
    }
}

async fn run(plugin: Arc<dyn PluginHooks>, hook: &Hook) -> HookOutcome {
    let kind = hook.kind();
    let plugin_id = plugin.plugin_id().to_string();

    let result = match AssertUnwindSafe(dispatch(plugin.as_ref(), hook))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            warn!(plugin_id = %plugin_id, hook = %kind, error = %err, "Plugin hook failed");
            Err(PluginError::HookFailed {
                plugin_id: plugin_id.clone(),
                hook: kind.as_str(),
                message: format!("{err:#}"),
            })
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(plugin_id = %plugin_id, hook = %kind, panic = %message, "Plugin hook panicked");
            Err(PluginError::HookPanicked {
                plugin_id: plugin_id.clone(),
                hook: kind.as_str(),
                message,
            })
        }
    };

    HookOutcome {
        plugin_id,
        hook: kind,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        id: String,
        calls: Arc<Mutex<Vec<String>>>,
        fail_on_mount: bool,
    }

    impl Recorder {
        fn new(id: &str, calls: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                calls: calls.clone(),
                fail_on_mount: false,
            })
        }
    }

    #[async_trait]
    impl PluginHooks for Recorder {
        fn plugin_id(&self) -> &str {
            &self.id
        }

        async fn on_mount(&self, panel_id: &str) -> anyhow::Result<()> {
            self.calls.lock().push(format!("{}:mount:{panel_id}", self.id));
            if self.fail_on_mount {
                anyhow::bail!("panel {panel_id} refused");
            }
            Ok(())
        }

        async fn on_content_change(&self, document_id: &str, content: &str) -> anyhow::Result<()> {
            self.calls
                .lock()
                .push(format!("{}:content:{document_id}:{content}", self.id));
            Ok(())
        }

        async fn on_after_reload(&self, success: bool) -> anyhow::Result<()> {
            self.calls.lock().push(format!("{}:after_reload:{success}", self.id));
            Ok(())
        }
    }

    struct Panicky;

    #[async_trait]
    impl PluginHooks for Panicky {
        fn plugin_id(&self) -> &str {
            "panicky"
        }

        async fn on_mount(&self, _panel_id: &str) -> anyhow::Result<()> {
            panic!("mount exploded");
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_typed_arguments() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let plugin = Recorder::new("a", &calls);

        dispatch(
            plugin.as_ref(),
            &Hook::ContentChange {
                document_id: "doc-1".into(),
                content: "hello".into(),
            },
        )
        .await
        .unwrap();
        dispatch(plugin.as_ref(), &Hook::AfterReload { success: true })
            .await
            .unwrap();
        // Hooks without an override are no-ops.
        dispatch(plugin.as_ref(), &Hook::Unload).await.unwrap();

        assert_eq!(
            *calls.lock(),
            vec!["a:content:doc-1:hello", "a:after_reload:true"]
        );
    }

    #[tokio::test]
    async fn test_execute_isolates_failures_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new();
        registry.register(Recorder::new("first", &calls));
        registry.register(Arc::new(Recorder {
            id: "failing".into(),
            calls: calls.clone(),
            fail_on_mount: true,
        }));
        registry.register(Arc::new(Panicky));
        registry.register(Recorder::new("last", &calls));

        let outcomes = registry
            .execute(&Hook::Mount {
                panel_id: "sidebar".into(),
            })
            .await;

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1].result, Err(PluginError::HookFailed { .. })));
        assert!(matches!(outcomes[2].result, Err(PluginError::HookPanicked { ref message, .. }) if message == "mount exploded"));
        assert!(outcomes[3].is_ok());
        assert_eq!(
            *calls.lock(),
            vec!["first:mount:sidebar", "failing:mount:sidebar", "last:mount:sidebar"]
        );
    }

    #[tokio::test]
    async fn test_execute_for_targets_one_plugin() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new();
        registry.register(Recorder::new("a", &calls));
        registry.register(Recorder::new("b", &calls));

        registry
            .execute_for("b", &Hook::AfterReload { success: false })
            .await
            .unwrap();
        assert_eq!(*calls.lock(), vec!["b:after_reload:false"]);

        let missing = registry.execute_for("zzz", &Hook::Load).await;
        assert!(matches!(missing, Err(PluginError::NotFound(id)) if id == "zzz"));
    }

    #[test]
    fn test_register_replaces_same_id() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new();
        assert!(registry.register(Recorder::new("a", &calls)).is_none());
        assert!(registry.register(Recorder::new("a", &calls)).is_some());
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("a").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_hook_serde_tag() {
        let hook: Hook = serde_json::from_str(r#"{"hook":"mount","panel_id":"main"}"#).unwrap();
        assert_eq!(hook, Hook::Mount { panel_id: "main".into() });
        assert_eq!(hook.kind().as_str(), "on_mount");
    }

    #[test]
    fn test_panic_message_payloads() {
        let literal = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*literal), "boom");

        let formatted = std::panic::catch_unwind(|| panic!("bad {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*formatted), "bad 7");

        let opaque = std::panic::catch_unwind(|| std::panic::panic_any(42)).unwrap_err();
        assert_eq!(panic_message(&*opaque), "non-string panic payload");
    }
}
