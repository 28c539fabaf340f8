//! Static announcement text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::kernel::{CommandSpec, Invocation, JsonStore, Module, ModuleContext, Outcome, Reply};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub text: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self { text: "📰 No news yet. Admins can set it in config/news.json.".to_string() }
    }
}

pub struct NewsModule {
    config: JsonStore<NewsConfig>,
}

impl NewsModule {
    pub fn new(ctx: &ModuleContext) -> Self {
        Self { config: JsonStore::load_or_default(ctx.config_path("news")) }
    }
}

#[async_trait]
impl Module for NewsModule {
    fn name(&self) -> &'static str {
        "news"
    }

    fn display_name(&self) -> &'static str {
        "News"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec::public("news", "Latest news")]
    }

    async fn on_command(&self, _ctx: &ModuleContext, _inv: &Invocation) -> Outcome {
        vec![Reply::text(self.config.get().text)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Database, Incoming};
    use std::time::Duration;

    #[tokio::test]
    async fn test_news_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ModuleContext::new(Database::in_memory().unwrap(), [1], dir.path(), Duration::from_secs(60));
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(ctx.config_path("news"), r#"{"text":"Release 2.0 is out"}"#).unwrap();

        let module = NewsModule::new(&ctx);
        let inv = Invocation::parse(Incoming::private(3, "/news")).unwrap();
        assert_eq!(module.on_command(&ctx, &inv).await, vec![Reply::text("Release 2.0 is out")]);
    }
}
