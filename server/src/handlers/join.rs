//! Menu clicks, the join dialog and the final redirect.
//!
//! A server button opens a confirmation dialog (`join_request`). Confirming it comes
//! back as a `join_server` dialog return, which either applies merchant edits or
//! sends the client on to the chosen server.

use super::world::{self, renew_listing, Renewal};
use crate::dispatcher::Context;
use crate::error::Result;
use crate::menu::{Dialog, Direction, Size};
use crate::outbound::{
    console_message, dialog_request, failed_to_enter_world, send_to_server, set_has_growid,
    LoginMode, RedirectTarget,
};
use crate::session::{Role, SessionState};
use crate::store::{ButtonColor, ServerRecord};
use crate::utils::{format_number, param_get_value, unix_timestamp};
use log::{debug, info, warn};
use shared::TextScanner;

const SUSPICIOUS_ACCOUNT: &str = "The system has detected suspicious behavior from your account. This server does not allow abnormal player activity.";

fn access_denied(dialog: Dialog, elevated: bool) -> Dialog {
    let dialog = dialog
        .label(Size::Big, "`4Access Denied", Direction::Center)
        .small_text(SUSPICIOUS_ACCOUNT);
    let dialog = if elevated {
        dialog.small_text("`9(Merchant account still can access the server)")
    } else {
        dialog
    };
    dialog.spacer(Size::Small)
}

/// Clamps an atoi-style colour component into a byte
fn color_component(text: &str) -> u8 {
    let value: i64 = text
        .trim()
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || (i == 0 && c == '-'))
        .map(|(_, c)| c)
        .collect::<String>()
        .parse()
        .unwrap_or(0);
    value.clamp(0, 255) as u8
}

/// Parses `r,g,b,a`. Anything with fewer than four parts is ignored.
fn parse_color(text: &str) -> Option<ButtonColor> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() < 4 {
        return None;
    }
    Some(ButtonColor {
        red: color_component(parts[0]),
        green: color_component(parts[1]),
        blue: color_component(parts[2]),
        alpha: color_component(parts[3]),
    })
}

/// Overwrites a listing with whatever the merchant filled in. Empty text fields and
/// checkboxes missing from the return leave the stored value alone.
fn apply_edits(server: &mut ServerRecord, scanner: &TextScanner) {
    let display_name = scanner.get("options_display_name", 1);
    if !display_name.is_empty() {
        server.display_name = display_name.to_string();
    }
    let name = scanner.get("options_name", 1);
    if !name.is_empty() {
        server.name = name.to_string();
    }
    let host = scanner.get("options_host", 1);
    if !host.is_empty() {
        server.host = host.to_string();
    }
    match u16::try_from(scanner.get_u32("options_port", 1)) {
        Ok(port) if port != 0 => server.port = port,
        _ => {}
    }
    if let Some(color) = parse_color(scanner.get("options_color", 1)) {
        server.options.color = color;
    }

    if scanner.contains("options_hide_server") {
        server.options.hide_server = scanner.get_flag("options_hide_server");
    }
    if scanner.contains("options_block_3rd_app") {
        server.options.block_3rd_app = scanner.get_flag("options_block_3rd_app");
    }
    if scanner.contains("options_disable") {
        server.options.disable = scanner.get_flag("options_disable");
    }
}

/// Redirect parameters saved for replay, with `last_access` refreshed
fn session_params(param: &str, now: i64) -> String {
    let base = match param.find("&last_access=") {
        Some(index) => &param[..index],
        None => param,
    };
    format!("{}&last_access={}", base, now)
}

/// `join_server` dialog return: merchant edits, then the redirect itself
pub fn join_server(ctx: &mut Context<'_>, scanner: &TextScanner) -> Result<bool> {
    let param = scanner.get("param", 1);
    if param.is_empty() {
        return Ok(true);
    }

    let name = param_get_value("name", param);
    let login = ctx.login()?;
    let gateway = ctx.gateway;
    let store = &gateway.store;
    let mut merchant = store.load_merchant(&login.merchant)?;
    let mut list = if merchant.servers_key.is_empty() {
        None
    } else {
        store.load_servers(&merchant.servers_key)?
    };
    let elevated = ctx.session.roles().at_least(Role::MERCHANT);

    let mut target = None;
    if let Some(list) = list.as_mut() {
        let found = list
            .servers
            .iter()
            .position(|server| !server.options.disable && server.name == name);

        if let Some(index) = found {
            let button = scanner.get("buttonClicked", 1);
            if elevated {
                apply_edits(&mut list.servers[index], scanner);

                if button == "apply" || button == "options_delete" {
                    if button == "options_delete" {
                        let removed = list.servers.remove(index);
                        info!("{} deleted listing {} of {}", ctx.peer, removed.name, login.merchant);
                    } else {
                        info!("{} updated listing {} of {}", ctx.peer, name, login.merchant);
                    }
                    store.save_servers(&merchant.servers_key, list)?;
                    return world::show_world_list(ctx);
                }
            } else if list.servers[index].options.block_3rd_app && ctx.session.risk_flagged() {
                debug!("Refusing {} access to {}, client is flagged", ctx.peer, name);
                ctx.send(dialog_request(
                    &access_denied(Dialog::new().default_color('o'), false)
                        .end("join_server", "Nevermind", "")
                        .build(),
                ));
                return Ok(true);
            }

            let server = &mut list.servers[index];
            if !server.options.disable
                && renew_listing(server, &mut merchant.coin, unix_timestamp()) != Renewal::Disabled
            {
                target = Some((server.host.clone(), server.port));
            }
        }

        store.save_servers(&merchant.servers_key, list)?;
        store.save_merchant(&login.merchant, &merchant)?;
    }

    let Some((host, port)) = target else {
        ctx.send(set_has_growid("", ""));
        ctx.send(console_message(&format!(
            "`oOops! It looks like the `9{} ``service has been shut down. Please contact the merchant for more information.",
            name
        )));
        return Ok(true);
    };

    if !login.session.is_empty() {
        store.save_session(&login.session, &session_params(param, unix_timestamp()))?;
    }

    let credentials = ctx.session.credentials();
    info!(
        "Redirecting {} ({}) to {} at {}:{}",
        ctx.peer, credentials.account_name, name, host, port
    );
    ctx.send(send_to_server(&RedirectTarget {
        host,
        port,
        mode: LoginMode::RedirectLogin,
        session: login.session,
        display_name: credentials.account_name,
        door_id: "0".to_string(),
    }));
    ctx.session.set_state(SessionState::PendingRedirect);
    ctx.disconnect();
    Ok(false)
}

/// Confirmation dialog for a server button, with edit controls for merchants
fn confirm_dialog(ctx: &Context<'_>, clicked: &str) -> String {
    let name = param_get_value("name", clicked);
    let host = param_get_value("host", clicked);
    let port = param_get_value("port", clicked);
    let block_3rd_app = param_get_value("block_3rd_app", clicked) == "true";
    let elevated = ctx.session.roles().at_least(Role::MERCHANT);

    let mut dialog = Dialog::new().default_color('o');
    if block_3rd_app && ctx.session.risk_flagged() {
        dialog = access_denied(dialog, elevated);
    } else {
        dialog = dialog
            .embed("param", clicked)
            .label(Size::Big, "`wConfirm action", Direction::Center)
            .small_text(&format!(
                "Connecting you to the {} server! The game might freeze for a moment while downloading data, so hang tight. If you want to switch servers, just log out from the Home screen and log back in.",
                name
            ))
            .spacer(Size::Small);
    }

    if elevated {
        dialog = dialog
            .spacer(Size::Small)
            .label(Size::Large, "`wServer options:", Direction::Left)
            .text_input("options_display_name", "New display name: ", "", 10)
            .small_text("Show display name in server button (Server's list)")
            .text_input("options_name", "Name: ", name, 10)
            .text_input("options_host", "Host: ", host, 16)
            .text_input("options_port", "Port: ", port, 5)
            .text_input(
                "options_color",
                "Button color (r,g,b,a) [example: 255,10,255,255]: ",
                "",
                16,
            )
            .small_text("Hide this server from Server's list")
            .checkbox("options_hide_server", "`9Hide server", false)
            .small_text("Don't use any 3rd-app on this server >:")
            .checkbox("options_block_3rd_app", "`4Block 3rd App", block_3rd_app)
            .small_text("The server will be temporarily disabled, and coin usage will be paused until it resumes.")
            .checkbox("options_disable", "`4Disable", false)
            .spacer(Size::Small)
            .button("options_delete", "`4Delete this server")
            .button("apply", "Apply")
            .spacer(Size::Small);
    }

    dialog.end("join_server", "Nevermind", "Continue").build()
}

fn profile_dialog(ctx: &Context<'_>) -> Result<String> {
    let login = ctx.login()?;
    let store = &ctx.gateway.store;
    let merchant = store.load_merchant(&login.merchant)?;
    let listings = if merchant.servers_key.is_empty() {
        0
    } else {
        store
            .load_servers(&merchant.servers_key)?
            .map_or(0, |list| list.servers.len())
    };

    Ok(Dialog::new()
        .default_color('o')
        .label(Size::Big, "`wMy Profile", Direction::Left)
        .small_text(&format!("Merchant:\t\t `w{}", login.merchant))
        .small_text(&format!("Role:\t\t `w{}", ctx.session.roles().name()))
        .small_text(&format!("Coins:\t\t `2{}", format_number(merchant.coin)))
        .small_text(&format!("Servers:\t\t `2{}", format_number(listings as i64)))
        .spacer(Size::Small)
        .end("my_profile", "Close", "")
        .build())
}

fn control_panel_dialog(ctx: &Context<'_>) -> Result<String> {
    let store = &ctx.gateway.store;
    let merchants = store.count_merchants()?;
    let sessions = store.count_sessions()?;
    let transactions = store.load_transactions()?;
    let cache = ctx.gateway.cache.stats();

    Ok(Dialog::new()
        .default_color('o')
        .label(Size::Big, "`wControl Panel", Direction::Left)
        .small_text("Here you can view all registered merchants and monitor all servers owned by them.")
        .spacer(Size::Small)
        .label(Size::Small, "`wGateway statistics:", Direction::Left)
        .small_text(&format!("Merchant registered:\t\t `2{}", format_number(merchants as i64)))
        .small_text(&format!("Session saved:\t\t `2{}", format_number(sessions as i64)))
        .small_text(&format!("Coin used:\t\t `2{}", format_number(transactions.coin.used)))
        .small_text(&format!("Coin produced:\t\t `2{}", format_number(transactions.coin.produced)))
        .spacer(Size::Small)
        .label(Size::Small, "`wSession cache:", Direction::Left)
        .small_text(&format!("Cached entries:\t\t `2{}", format_number(cache.size as i64)))
        .small_text(&format!("Hit rate:\t\t `2{:.1}%", cache.hit_rate * 100.0))
        .spacer(Size::Small)
        .end("control_panel", "Nevermind", "")
        .build())
}

/// `join_request` / `world_button`: a click in the world-select menu
pub fn join_request(ctx: &mut Context<'_>, scanner: &TextScanner) -> Result<bool> {
    let clicked = scanner.get("name", 1);
    let roles = ctx.session.roles();

    ctx.send(failed_to_enter_world());

    if let Some(page) = clicked.strip_prefix("page_") {
        let page = page.parse::<i64>().unwrap_or(0).max(0) as usize;
        ctx.session.set_page(page);
        return world::show_world_list(ctx);
    }

    match clicked {
        "my_profile" => {
            if !roles.at_least(Role::MERCHANT) {
                return Ok(true);
            }
            let dialog = profile_dialog(ctx)?;
            ctx.send(dialog_request(&dialog));
        }
        "control_panel" => {
            if !roles.at_least(Role::ADMIN) {
                return Ok(true);
            }
            let dialog = control_panel_dialog(ctx)?;
            ctx.send(dialog_request(&dialog));
        }
        _ if clicked.starts_with("name=") => {
            let dialog = confirm_dialog(ctx, clicked);
            ctx.send(dialog_request(&dialog));
        }
        _ => warn!("Unknown world menu button {:?} from {}", clicked, ctx.peer),
    }
    Ok(false)
}

pub fn exit(ctx: &mut Context<'_>, _: &TextScanner) -> Result<bool> {
    ctx.session.set_state(SessionState::Disconnected);
    ctx.disconnect();
    Ok(false)
}

pub fn quit_to_exit(ctx: &mut Context<'_>, _: &TextScanner) -> Result<bool> {
    world::show_world_list(ctx)
}
