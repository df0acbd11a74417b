//! Frames the gateway sends back, and the per-message outbox handlers write into.

use shared::FrameBuilder;

/// Everything a handler wants sent to its connection, in order
#[derive(Debug, Default)]
pub struct Outbox {
    frames: Vec<Vec<u8>>,
    disconnect: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, frame: FrameBuilder) {
        self.frames.push(frame.into_bytes());
    }

    /// Close the connection once the queued frames have gone out
    pub fn disconnect(&mut self) {
        self.disconnect = true;
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn should_disconnect(&self) -> bool {
        self.disconnect
    }

    pub fn into_parts(self) -> (Vec<Vec<u8>>, bool) {
        (self.frames, self.disconnect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LoginMode {
    ClientLogin = 0,
    RedirectLogin = 1,
}

/// Where a client should reconnect and what it should present there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub host: String,
    pub port: u16,
    pub mode: LoginMode,
    pub session: String,
    pub display_name: String,
    pub door_id: String,
}

pub fn console_message(text: &str) -> FrameBuilder {
    FrameBuilder::call("OnConsoleMessage").push(text)
}

/// Tells the client which account it is logged in as
pub fn set_has_growid(account_name: &str, account_secret: &str) -> FrameBuilder {
    FrameBuilder::call("SetHasGrowID")
        .push(0i32)
        .push(account_name)
        .push(account_secret)
}

pub fn send_to_server(target: &RedirectTarget) -> FrameBuilder {
    FrameBuilder::call("OnSendToServer")
        .push(target.port as i32)
        .push(0i32)
        .push(0i32)
        .push(format!("{}|{}|{}", target.host, target.door_id, target.session))
        .push(target.mode as i32)
        .push(target.display_name.as_str())
}

pub fn request_world_select_menu(menu: &str) -> FrameBuilder {
    FrameBuilder::call("OnRequestWorldSelectMenu").push(menu)
}

/// Cancels the client's pending world-enter animation
pub fn failed_to_enter_world() -> FrameBuilder {
    FrameBuilder::call("OnFailedToEnterWorld")
}

pub fn dialog_request(dialog: &str) -> FrameBuilder {
    FrameBuilder::call("OnDialogRequest").push(dialog)
}
