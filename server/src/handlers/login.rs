//! Bootstrap commands. Either one unlocks the rest of the dispatcher for the session.

use super::{join, world};
use crate::dispatcher::Context;
use crate::error::Result;
use crate::outbound::{console_message, send_to_server, set_has_growid, LoginMode, RedirectTarget};
use crate::session::{LoginToken, SessionState};
use crate::utils::{decode_base64_lenient, is_valid_guid, is_valid_mac, param_get_value};
use log::{debug, warn};
use shared::TextScanner;
use std::time::Duration;

/// How long an address counts as recently seen after a token login
pub const RECENT_LOGIN_TTL: Duration = Duration::from_secs(300);

const PLATFORM_WINDOWS: i32 = 0;
const PLATFORM_IOS: i32 = 1;
const PLATFORM_OSX: i32 = 2;
const PLATFORM_ANDROID: i32 = 4;

/// MAC reported by clients that cannot read the real one
const PLACEHOLDER_MAC: &str = "02:00:00:00:00:00";

const THIRD_PARTY_WARNING: &str = "`9Warning: Our system has detected that you're using a `4third-party application`9. Some servers may deny your access. If you believe this is a mistake, please contact the `omerchant owner`9.";

fn merchant_or_default(ctx: &Context<'_>, merchant: &str) -> String {
    if merchant.is_empty() {
        ctx.gateway.config.default_server.default_name.clone()
    } else {
        merchant.to_string()
    }
}

/// `ltoken|<base64>`: a returning client hands over a pre-issued token and is sent
/// straight on to the default game server.
pub fn ltoken(ctx: &mut Context<'_>, scanner: &TextScanner) -> Result<bool> {
    let decoded = decode_base64_lenient(scanner.get("ltoken", 1));
    let session_token = param_get_value("_session", &decoded);
    let merchant = param_get_value("merchant_name", &decoded);
    let account_name = param_get_value("growId", &decoded);
    let account_secret = param_get_value("password", &decoded);

    ctx.session.set_account(account_name, account_secret);
    let address = ctx.session.credentials().address;
    ctx.gateway
        .cache
        .set_with_ttl(&address.to_string(), 1i32, RECENT_LOGIN_TTL);

    let merchant = merchant_or_default(ctx, merchant);
    ctx.session.set_login(LoginToken {
        session: session_token.to_string(),
        merchant: merchant.clone(),
    });
    ctx.session.set_state(SessionState::Authenticated);
    debug!("Token login for {} on {} from {}", account_name, merchant, ctx.peer);

    let default_server = &ctx.gateway.config.default_server;
    let target = RedirectTarget {
        host: default_server.server_ip.clone(),
        port: default_server.server_port,
        mode: LoginMode::ClientLogin,
        session: session_token.to_string(),
        display_name: account_name.to_string(),
        door_id: merchant.clone(),
    };

    ctx.send(console_message(&format!("`oConnected on `w{}``.", merchant)));
    ctx.send(set_has_growid(account_name, account_secret));
    ctx.send(send_to_server(&target));

    ctx.session.set_state(SessionState::PendingRedirect);
    ctx.disconnect();
    Ok(false)
}

/// Reason the login fingerprint looks like a third-party client, if it does.
/// Later checks take precedence over earlier ones.
pub fn detect_third_party(scanner: &TextScanner) -> Option<&'static str> {
    let mac = scanner.get("mac", 1);
    let platform = scanner.get_i32("platformID", 1);
    let mut reason = None;

    let mac_platform = matches!(platform, PLATFORM_IOS | PLATFORM_OSX | PLATFORM_WINDOWS);
    if !is_valid_mac(mac)
        || (!mac_platform && mac != PLACEHOLDER_MAC)
        || (platform == PLATFORM_WINDOWS && !scanner.contains("fz") && mac != PLACEHOLDER_MAC)
    {
        reason = Some("Invalid MAC");
    }

    if requested_name_misplaced(scanner) {
        reason = Some("Invalid requestedName");
    }

    if platform == PLATFORM_WINDOWS && scanner.contains("token") {
        reason = Some("Invalid token");
    }

    if platform == PLATFORM_ANDROID && !is_valid_guid(scanner.get("gid", 1)) {
        reason = Some("Invalid GID");
    }

    reason
}

/// The stock client sends `requestedName` right after the password line
fn requested_name_misplaced(scanner: &TextScanner) -> bool {
    let line_of = |key: &str| (0..scanner.line_count()).find(|&i| scanner.field(i, 0) == key);

    match line_of("requestedName") {
        Some(requested) => line_of("tankIDPass").map_or(true, |pass| requested != pass + 1),
        None => false,
    }
}

/// `tankIDName|...`: full login from the game client
pub fn player_login(ctx: &mut Context<'_>, scanner: &TextScanner) -> Result<bool> {
    let account_name = scanner.get("tankIDName", 1);
    let account_secret = scanner.get("tankIDPass", 1);
    let session_token = scanner.get("UUIDToken", 1).to_string();
    let merchant = merchant_or_default(ctx, scanner.get("doorID", 1));

    ctx.session.set_account(account_name, account_secret);
    ctx.session.set_login(LoginToken {
        session: session_token.clone(),
        merchant,
    });
    ctx.session.set_state(SessionState::Authenticated);

    if let Some(reason) = detect_third_party(scanner) {
        warn!(
            "{} ({}) flagged as third-party client: {}",
            ctx.peer, account_name, reason
        );
        ctx.session.lock().attributes.third_party = Some(reason.to_string());
        ctx.send(console_message(THIRD_PARTY_WARNING));
    }

    ctx.send(set_has_growid(account_name, account_secret));

    if !session_token.is_empty() {
        match ctx.gateway.store.load_session(&session_token) {
            Ok(Some(params)) => return resume_session(ctx, &params),
            Ok(None) => {}
            Err(e) => warn!("Could not read saved session for {}: {}", ctx.peer, e),
        }
    }

    world::show_world_list(ctx)
}

/// Replays a saved join as if the player had confirmed it again. The connection is
/// closed whatever the outcome.
fn resume_session(ctx: &mut Context<'_>, params: &str) -> Result<bool> {
    debug!("Resuming saved session for {}", ctx.peer);
    let replay = TextScanner::parse(&format!(
        "action|dialog_return\ndialog_name|join_server\nparam|{}|\n",
        params
    ));

    if let Err(e) = join::join_server(ctx, &replay) {
        warn!("Saved session replay failed for {}: {}", ctx.peer, e);
        ctx.send(console_message(&e.player_message()));
    }
    ctx.disconnect();
    Ok(false)
}
