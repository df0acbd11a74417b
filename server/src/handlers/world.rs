//! World-select menu: listing renewal, pagination and rendering.

use crate::dispatcher::Context;
use crate::error::Result;
use crate::menu::{bgra, default_button_color, WorldMenu};
use crate::outbound::{console_message, request_world_select_menu};
use crate::session::{Role, SessionState};
use crate::store::ServerRecord;
use crate::utils::unix_timestamp;
use log::{debug, info, warn};
use shared::MAX_DATAGRAM_SIZE;

/// Length of one paid listing period
pub const RENEWAL_PERIOD_SECS: i64 = 30 * 24 * 3600;

/// Buttons on the first page. Each later page holds twice as many as the one before.
pub const FIRST_PAGE_CAPACITY: usize = 10;

pub const MAX_PAGE_CAPACITY: usize = 40;

/// Room for server buttons in one menu frame. The rest of the datagram is left for
/// the frame header, notices, dashboard and paging buttons.
pub const PAGE_BYTE_BUDGET: usize = MAX_DATAGRAM_SIZE * 3 / 4;

const LOW_COIN_WARNING: &str = "`9Warning`w: Your total coins are now `o0`w, don't forget to top up in `5Dashboard -> My profile -> Top up coins`w.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// Not yet expired
    Active,
    /// Expired and extended by one coin
    Renewed,
    /// Expired with no coin left; the listing is now disabled
    Disabled,
}

/// Charges one coin to extend an expired listing by [`RENEWAL_PERIOD_SECS`],
/// or disables it when the merchant is out of coins.
pub fn renew_listing(server: &mut ServerRecord, coin: &mut i64, now: i64) -> Renewal {
    if server.expired_at >= now {
        return Renewal::Active;
    }

    if *coin > 0 {
        *coin -= 1;
        server.expired_at += RENEWAL_PERIOD_SECS;
        Renewal::Renewed
    } else {
        server.options.disable = true;
        Renewal::Disabled
    }
}

/// Groups visible listings into pages. A page closes when it reaches its button
/// capacity, which doubles from page to page up to [`MAX_PAGE_CAPACITY`], or when the
/// next button would push it past [`PAGE_BYTE_BUDGET`].
#[derive(Debug, Clone)]
pub struct Paginator {
    capacity: usize,
    count: usize,
    bytes: usize,
    page: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self {
            capacity: FIRST_PAGE_CAPACITY,
            count: 0,
            bytes: 0,
            page: 0,
        }
    }
}

impl Paginator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page for the next button, `bytes` long once rendered
    pub fn place(&mut self, bytes: usize) -> usize {
        if self.count >= self.capacity {
            self.capacity = (self.capacity * 2).min(MAX_PAGE_CAPACITY);
            self.next_page();
        } else if self.count > 0 && self.bytes + bytes > PAGE_BYTE_BUDGET {
            self.next_page();
        }
        self.count += 1;
        self.bytes += bytes;
        self.page
    }

    fn next_page(&mut self) {
        self.page += 1;
        self.count = 0;
        self.bytes = 0;
    }
}

/// Button name the menu sends back when a server is clicked
pub fn server_button_name(server: &ServerRecord) -> String {
    format!(
        "name={}&host={}&port={}&block_3rd_app={}",
        server.name, server.host, server.port, server.options.block_3rd_app
    )
}

/// Rendered menu line for one listing
fn server_button(server: &ServerRecord) -> String {
    let label = if server.display_name.is_empty() {
        &server.name
    } else {
        &server.display_name
    };
    let color = server.options.color;
    WorldMenu::button_line(
        label,
        &server_button_name(server),
        0.6,
        bgra(color.blue, color.green, color.red, color.alpha),
    )
}

/// Loads the merchant behind the session, settles expired listings and renders the
/// page the session is on. Both documents are written back on every call.
pub fn build_world_list(ctx: &mut Context<'_>) -> Result<String> {
    let login = ctx.login()?;
    let gateway = ctx.gateway;
    let store = &gateway.store;
    let mut merchant = store.load_merchant(&login.merchant)?;

    let credentials = ctx.session.credentials();
    let is_owner = merchant.is_owner(&credentials.account_name, &credentials.account_secret);
    let mut notices = String::new();
    if is_owner {
        ctx.session.grant_role(Role::from_document_role(&merchant.role));
        if merchant.coin < 1 {
            notices.push_str(LOW_COIN_WARNING);
        }
    }

    let mut pages: Vec<Vec<String>> = Vec::new();
    if !merchant.servers_key.is_empty() {
        if let Some(mut list) = store.load_servers(&merchant.servers_key)? {
            let now = unix_timestamp();
            let mut paginator = Paginator::new();
            let mut disabled = 0;

            for server in list.servers.iter_mut() {
                if server.options.disable {
                    continue;
                }
                if renew_listing(server, &mut merchant.coin, now) == Renewal::Disabled {
                    info!("Listing {} of {} disabled, out of coins", server.name, login.merchant);
                    disabled += 1;
                    continue;
                }
                if merchant.options.hide_servers || server.options.hide_server {
                    continue;
                }

                let button = server_button(server);
                if button.len() > PAGE_BYTE_BUDGET {
                    warn!("Listing {} of {} is too large to show", server.name, login.merchant);
                    continue;
                }
                let page = paginator.place(button.len());
                if pages.len() <= page {
                    pages.resize_with(page + 1, Vec::new);
                }
                pages[page].push(button);
            }

            if disabled > 0 {
                notices.push_str(&format!(
                    "`w[`4{} servers have been disabled due to insufficient coins!`w]",
                    disabled
                ));
            }
            store.save_servers(&merchant.servers_key, &list)?;
        }
        store.save_merchant(&login.merchant, &merchant)?;
    }

    let roles = ctx.session.roles();
    let default_color = default_button_color();
    let mut menu = WorldMenu::new()
        .setup_simple_menu()
        .heading("Enter the `#server name `0in the column above `4^`0 (");
    if !notices.is_empty() {
        menu = menu.heading(&notices);
    }

    if roles.intersects(Role::ADMIN | Role::MERCHANT) {
        menu = menu.heading("Dashboard<ROW2>");
        if roles.contains(Role::ADMIN) {
            menu = menu.button("Control Panel", "control_panel", 0.5, default_color);
        }
        menu = menu.button("My Profile", "my_profile", 0.5, default_color);
    }

    if !pages.is_empty() {
        let page = ctx.session.page();
        let row_break = if is_owner { "<CR>" } else { "<ROW2>" };
        menu = menu.heading(&format!("Available servers{}", row_break));

        for button in pages.get(page).map(Vec::as_slice).unwrap_or_default() {
            menu = menu.line(button);
        }

        if page + 1 < pages.len() {
            menu = menu.button("Next page", &format!("page_{}", page + 1), 0.6, default_color);
        }
        if page > 0 {
            menu = menu.button("Previous page", &format!("page_{}", page - 1), 0.6, default_color);
        }
    }

    debug!(
        "World list for {} on {}: {} pages, showing page {}",
        ctx.peer,
        login.merchant,
        pages.len(),
        ctx.session.page()
    );
    Ok(menu.build())
}

/// Sends the world-select menu. A merchant that cannot be loaded ends the connection.
pub fn show_world_list(ctx: &mut Context<'_>) -> Result<bool> {
    match build_world_list(ctx) {
        Ok(menu) => {
            ctx.send(request_world_select_menu(&menu));
            ctx.session.set_state(SessionState::WorldListShown);
            Ok(true)
        }
        Err(e) => {
            warn!("Could not build world list for {}: {}", ctx.peer, e);
            ctx.send(console_message(&e.player_message()));
            ctx.disconnect();
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{first_text, function_names, Harness};

    fn listing(name: &str, expired_at: i64) -> ServerRecord {
        ServerRecord::new(name, expired_at)
    }

    #[test]
    fn test_renewal_with_coins() {
        let now = 1_700_000_000;
        let mut server = listing("alpha", now - 60);
        let mut coin = 3;

        assert_eq!(renew_listing(&mut server, &mut coin, now), Renewal::Renewed);
        assert_eq!(server.expired_at, now - 60 + RENEWAL_PERIOD_SECS);
        assert_eq!(coin, 2);
        assert!(!server.options.disable);

        assert_eq!(renew_listing(&mut server, &mut coin, now), Renewal::Active);
        assert_eq!(coin, 2);
    }

    #[test]
    fn test_renewal_without_coins() {
        let now = 1_700_000_000;
        let mut server = listing("alpha", now - 1);
        let mut coin = 0;

        assert_eq!(renew_listing(&mut server, &mut coin, now), Renewal::Disabled);
        assert!(server.options.disable);
        assert_eq!(server.expired_at, now - 1);
        assert_eq!(coin, 0);
    }

    #[test]
    fn test_pagination_doubles_capacity() {
        let mut paginator = Paginator::new();
        let pages: Vec<usize> = (0..31).map(|_| paginator.place(64)).collect();

        assert!(pages[..10].iter().all(|&p| p == 0));
        assert!(pages[10..30].iter().all(|&p| p == 1));
        assert_eq!(pages[30], 2);
    }

    #[test]
    fn test_pagination_capacity_is_capped() {
        let mut paginator = Paginator::new();
        let pages: Vec<usize> = (0..150).map(|_| paginator.place(64)).collect();

        // 10, 20, 40, then 40 per page from there on
        assert_eq!(pages[69], 2);
        assert_eq!(pages[70], 3);
        assert_eq!(pages[109], 3);
        assert_eq!(pages[110], 4);
        assert_eq!(pages[149], 4);
    }

    #[test]
    fn test_pagination_splits_on_size() {
        let mut paginator = Paginator::new();
        let half = PAGE_BYTE_BUDGET / 2;

        assert_eq!(paginator.place(half), 0);
        assert_eq!(paginator.place(half), 0);
        assert_eq!(paginator.place(1), 1);
        assert_eq!(paginator.place(PAGE_BYTE_BUDGET), 2);
    }

    #[test]
    fn test_world_list_pages_fit_in_a_datagram() {
        let harness = Harness::logged_in("M1", "G", "P");
        let now = unix_timestamp();
        let servers = (0..400)
            .map(|i| {
                let mut server = listing(&format!("server-{:04}", i), now + 3600);
                server.display_name = format!("`2{}", "x".repeat(120));
                server
            })
            .collect();
        harness.add_merchant("M1", "merchant", 5, servers);

        for page in [0, 3, 8] {
            harness.session.set_page(page);
            let (_, outbox) = harness.run(show_world_list);
            assert!(outbox.frames()[0].len() < MAX_DATAGRAM_SIZE);
            let menu = first_text(&outbox, "OnRequestWorldSelectMenu").unwrap();
            let buttons = menu.matches("name=server-").count();
            assert!(buttons > 0 && buttons <= MAX_PAGE_CAPACITY);
        }
    }

    #[test]
    fn test_world_list_for_player() {
        let harness = Harness::logged_in("M1", "G", "P");
        let now = unix_timestamp();
        let mut servers: Vec<ServerRecord> =
            (0..12).map(|i| listing(&format!("s{}", i), now + 3600)).collect();
        servers[1].options.hide_server = true;
        servers[2].display_name = String::new();
        harness.add_merchant("M1", "merchant", 5, servers);

        let (result, outbox) = harness.run(show_world_list);
        assert!(result.unwrap());
        assert_eq!(function_names(&outbox), vec!["OnRequestWorldSelectMenu"]);
        assert_eq!(harness.session.state(), SessionState::WorldListShown);

        let menu = first_text(&outbox, "OnRequestWorldSelectMenu").unwrap();
        assert!(menu.starts_with("setup_simple_menu\n"));
        assert!(!menu.contains("Dashboard"));
        assert!(menu.contains("add_heading|Available servers<ROW2>\n"));
        assert!(menu.contains("add_button|s0|name=s0&host=127.0.0.1&port=17091&block_3rd_app=false|0.600000|0\n"));
        assert!(menu.contains("add_button|s2|name=s2&"));
        assert!(!menu.contains("name=s1&"));
        // Eleven visible entries: ten on page 0, one on page 1
        assert!(!menu.contains("name=s11&"));
        assert!(menu.contains("add_button|Next page|page_1|"));
        assert!(!menu.contains("Previous page"));
        assert!(harness.session.roles().is_empty());
    }

    #[test]
    fn test_world_list_for_owner_renews_and_disables() {
        let harness = Harness::logged_in("M1", "owner", "pw");
        let now = unix_timestamp();
        let expired = now - 10;
        harness.add_merchant(
            "M1",
            "admin",
            1,
            vec![listing("alpha", expired), listing("beta", expired)],
        );

        let (_, outbox) = harness.run(show_world_list);
        let menu = first_text(&outbox, "OnRequestWorldSelectMenu").unwrap();

        assert!(harness.session.roles().contains(Role::ADMIN));
        assert!(menu.contains("Dashboard<ROW2>"));
        assert!(menu.contains("add_button|Control Panel|control_panel|0.500000|"));
        assert!(menu.contains("add_button|My Profile|my_profile|0.500000|"));
        assert!(menu.contains("1 servers have been disabled due to insufficient coins!"));
        assert!(menu.contains("Available servers<CR>"));
        assert!(menu.contains("name=alpha&"));
        assert!(!menu.contains("name=beta&"));

        let servers = harness.servers("M1");
        assert_eq!(servers[0].expired_at, expired + RENEWAL_PERIOD_SECS);
        assert!(servers[1].options.disable);
        assert_eq!(harness.merchant("M1").coin, 0);
    }

    #[test]
    fn test_world_list_low_coin_warning_and_later_page() {
        let harness = Harness::logged_in("M1", "owner", "pw");
        let now = unix_timestamp();
        let servers = (0..15).map(|i| listing(&format!("s{}", i), now + 3600)).collect();
        harness.add_merchant("M1", "merchant", 0, servers);
        harness.session.set_page(1);

        let (_, outbox) = harness.run(show_world_list);
        let menu = first_text(&outbox, "OnRequestWorldSelectMenu").unwrap();

        assert!(menu.contains("Your total coins are now `o0`w"));
        assert!(!menu.contains("Control Panel"));
        assert!(menu.contains("name=s14&"));
        assert!(!menu.contains("name=s9&"));
        assert!(menu.contains("add_button|Previous page|page_0|"));
        assert!(!menu.contains("Next page"));
    }

    #[test]
    fn test_world_list_unknown_merchant() {
        let harness = Harness::logged_in("ghost", "G", "P");

        let (result, outbox) = harness.run(show_world_list);
        assert!(!result.unwrap());
        assert!(outbox.should_disconnect());
        assert!(first_text(&outbox, "OnConsoleMessage").unwrap().contains("ghost"));
    }
}
