use crate::bot::handlers::{self, get_user_id_safe, get_user_name, sender_id, Command};
use crate::bot::transport::incoming_media;
use crate::bot::views::ACCESS_DENIED;
use crate::bot::{AccessGuard, RateLimiter};
use crate::config::{
    get_unauthorized_cache_max_size, get_unauthorized_cache_ttl, get_unauthorized_cooldown,
    Settings, RATE_LIMIT_WINDOW_SECS,
};
use crate::relay::RelayService;
use crate::storage::{ObjectStore, WasabiStorage};
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{debug, error, info, warn};

/// Run the Telegram relay until Ctrl-C.
///
/// Exits the process with code 1 if the bot or the store cannot be set up.
pub async fn run_bot(settings: Arc<Settings>) {
    let bot = init_bot(&settings);
    let relay = init_relay(&settings).await;
    let guard = init_access_guard(&settings);
    let limiter = init_rate_limiter(&settings);
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay, settings, guard, limiter])
        // Every update is its own task; no per-chat ordering
        .distribution_function(|_| None::<std::convert::Infallible>)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn init_bot(settings: &Settings) -> Bot {
    let bot = Bot::new(settings.telegram_token.clone());
    let Some(api_url) = settings.telegram_api_url.as_deref() else {
        return bot;
    };

    match reqwest::Url::parse(api_url) {
        Ok(url) => {
            info!("Using Bot API server at {url}");
            bot.set_api_url(url)
        }
        Err(e) => {
            error!("Invalid TELEGRAM_API_URL '{api_url}': {e}");
            std::process::exit(1);
        }
    }
}

async fn init_relay(settings: &Settings) -> Arc<RelayService> {
    let storage = match WasabiStorage::new(settings).await {
        Ok(s) => {
            info!("Wasabi storage initialized for bucket '{}'.", s.bucket());
            s
        }
        Err(e) => {
            error!("Failed to initialize Wasabi storage: {}", e);
            std::process::exit(1);
        }
    };

    if storage.check_connection().await.is_err() {
        // Details already logged by check_connection
        warn!("Starting without a verified storage connection.");
    }

    info!(
        "Relay ready (staging dir: {}, link ttl: {}s, max file size: {} bytes)",
        settings.download_dir.display(),
        settings.link_ttl_secs,
        settings.max_file_size
    );
    Arc::new(RelayService::from_settings(Arc::new(storage), settings))
}

fn init_access_guard(settings: &Settings) -> Arc<AccessGuard> {
    let allowed = settings.allowed_users();
    let cooldown = get_unauthorized_cooldown();
    let ttl = get_unauthorized_cache_ttl();
    let max_size = get_unauthorized_cache_max_size();

    if allowed.is_empty() {
        warn!("ALLOWED_USERS is empty: every Telegram user can use the relay.");
    }
    info!(
        "Initializing AccessGuard ({} allowed users, cooldown: {}s, ttl: {}s, max_size: {})",
        allowed.len(),
        cooldown,
        ttl,
        max_size
    );

    Arc::new(AccessGuard::new(allowed, cooldown, ttl, max_size))
}

fn init_rate_limiter(settings: &Settings) -> Arc<RateLimiter> {
    info!(
        "Rate limit: {} requests per {}s per user",
        settings.rate_limit_per_minute, RATE_LIMIT_WINDOW_SECS
    );
    Arc::new(RateLimiter::new(
        settings.rate_limit_per_minute,
        Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
    ))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            // Channel posts and other messages without a user have no namespace
            dptree::filter(|msg: Message| sender_id(&msg).is_none()).endpoint(handle_no_sender),
        )
        .branch(
            dptree::filter(|msg: Message, guard: Arc<AccessGuard>| {
                guard.is_allowed(get_user_id_safe(&msg))
            })
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(handle_command),
            )
            .branch(
                dptree::filter(|msg: Message| incoming_media(&msg).is_some())
                    .endpoint(handle_upload),
            )
            .branch(dptree::endpoint(handle_unsupported)),
        )
        .branch(
            // Everyone the allow-list filter above rejected
            dptree::endpoint(handle_unauthorized),
        )
}

async fn handle_no_sender(msg: Message) -> Result<(), teloxide::RequestError> {
    debug!(
        "Ignoring message {} in chat {} without a sender",
        msg.id.0, msg.chat.id
    );
    respond(())
}

async fn handle_unauthorized(
    bot: Bot,
    msg: Message,
    guard: Arc<AccessGuard>,
) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    let user_name = get_user_name(&msg);

    if guard.should_send(user_id, &user_name).await {
        info!(
            "⛔️ Unauthorized access from user {} ({}). Sending denial message.",
            user_id, user_name
        );

        if let Err(e) = bot.send_message(msg.chat.id, ACCESS_DENIED).await {
            error!("Failed to send access denied message to {}: {}", user_id, e);
        } else {
            guard.mark_sent(user_id).await;
        }
    }

    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    relay: Arc<RelayService>,
    settings: Arc<Settings>,
    guard: Arc<AccessGuard>,
    limiter: Arc<RateLimiter>,
) -> Result<(), teloxide::RequestError> {
    if cmd.is_rate_limited() && !limiter.check(get_user_id_safe(&msg)).await {
        if let Err(e) = handlers::rate_limited(bot, msg).await {
            error!("Rate limit reply error: {}", e);
        }
        return respond(());
    }

    let res = match cmd {
        Command::Start | Command::Help => handlers::help(bot, msg, relay).await,
        Command::Download(name) => handlers::download(bot, msg, relay, name).await,
        Command::List => handlers::list(bot, msg, relay).await,
        Command::Link(name) => handlers::link(bot, msg, relay, name).await,
        Command::Delete(name) => handlers::delete(bot, msg, relay, name).await,
        Command::Status => handlers::status(bot, msg, relay, settings, guard, limiter).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_upload(
    bot: Bot,
    msg: Message,
    relay: Arc<RelayService>,
    limiter: Arc<RateLimiter>,
) -> Result<(), teloxide::RequestError> {
    let res = if limiter.check(get_user_id_safe(&msg)).await {
        handlers::upload(bot, msg, relay).await
    } else {
        handlers::rate_limited(bot, msg).await
    };
    if let Err(e) = res {
        error!("Upload handler error: {}", e);
    }
    respond(())
}

async fn handle_unsupported(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::unsupported(bot, msg).await {
        error!("Unsupported message handler error: {}", e);
    }
    respond(())
}
