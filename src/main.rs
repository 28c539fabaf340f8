use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use swiftbot::config::Config;
use swiftbot::kernel::{Incoming, ModuleContext, Router, TelegramClient};
use swiftbot::modules;
use swiftbot::telegram_log::TelegramLogLayer;

struct App {
    router: Router,
    telegram: TelegramClient,
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {e}");
        }
    }

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "bot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create {}: {e}", log_dir.display());
        std::process::exit(1);
    }
    let log_file = match std::fs::OpenOptions::new().create(true).append(true).open(config.log_file()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_writer(std::io::stdout).with_filter(
                tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
            ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(TelegramLogLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting swiftbot...");
    info!("Loaded config from {config_path}");
    info!("Admin IDs: {:?}", config.admin_ids);

    let ctx = match ModuleContext::from_config(&config) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("Failed to open database {}: {e}", config.database_path().display());
            std::process::exit(1);
        }
    };

    let mut router = Router::new(ctx.clone());
    if let Err(e) = modules::register_all(&mut router) {
        error!("Failed to initialize modules: {e}");
        std::process::exit(1);
    }

    let telegram = TelegramClient::new(bot.clone());
    telegram.register_commands(&router.public_commands()).await;

    let notices = router.startup_notices();
    if !notices.is_empty() {
        let admins: Vec<i64> = config.admin_ids.clone();
        telegram.notify_admins(&admins, &notices.join("\n")).await;
    }

    let _background = router.spawn_background();
    spawn_pending_purge(ctx.clone());

    let app = Arc::new(App { router, telegram });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![app])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/// Drop abandoned prompts so the map does not grow without bound.
fn spawn_pending_purge(ctx: Arc<ModuleContext>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let purged = ctx.pending.purge_expired();
            if purged > 0 {
                info!("⌛ Expired {purged} pending prompt(s)");
            }
        }
    });
}

async fn handle_message(msg: Message, app: Arc<App>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;
    let user_id = user.id.0 as i64;

    let Some(text) = msg.text() else {
        let outcome = app.router.handle_non_text(chat_id, user_id);
        app.telegram.deliver(chat_id, outcome).await;
        return Ok(());
    };

    let incoming = Incoming {
        chat_id,
        user_id,
        username: user.username.clone().unwrap_or_else(|| user.first_name.clone()),
        text: text.to_string(),
        is_private: msg.chat.is_private(),
    };
    let outcome = app.router.handle_message(incoming).await;
    app.telegram.deliver(chat_id, outcome).await;
    Ok(())
}

async fn handle_callback(q: CallbackQuery, app: Arc<App>) -> ResponseResult<()> {
    let user_id = q.from.id.0 as i64;
    let username = q.from.username.clone().unwrap_or_else(|| q.from.first_name.clone());
    let chat_id = q.message.as_ref().map(|m| m.chat().id.0).unwrap_or(user_id);

    let Some(data) = q.data.as_deref() else {
        warn!("Callback without data from {username} ({user_id})");
        app.telegram.deliver_callback(&q, Vec::new()).await;
        return Ok(());
    };
    let outcome = app.router.handle_callback(chat_id, user_id, &username, data).await;
    app.telegram.deliver_callback(&q, outcome).await;
    Ok(())
}
