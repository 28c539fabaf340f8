//! Built-in feature modules.

pub mod code_analyzer;
pub mod gemini;
pub mod infosystem;
pub mod module_manager;
pub mod news;
pub mod system;
pub mod weather;
pub mod youtube;

use std::sync::Arc;

use crate::kernel::Router;

/// Register every built-in module, in the order `/help` lists them.
pub fn register_all(router: &mut Router) -> rusqlite::Result<()> {
    let ctx = router.context().clone();
    router.register(Arc::new(system::SystemModule))?;
    router.register(Arc::new(weather::WeatherModule::new(&ctx)))?;
    router.register(Arc::new(gemini::GeminiModule::new(&ctx)))?;
    router.register(Arc::new(code_analyzer::CodeAnalyzerModule::new()))?;
    router.register(Arc::new(youtube::YoutubeModule::new(&ctx)))?;
    router.register(Arc::new(news::NewsModule::new(&ctx)))?;
    router.register(Arc::new(infosystem::InfoSystemModule::new()))?;
    router.register(Arc::new(module_manager::ModuleManager::new(&ctx)))?;
    Ok(())
}
