//! Text templates for the client's world-select menu and dialogs.
//!
//! Both are plain `|`-separated line formats the client renders; the builders here
//! only concatenate lines.

/// Packs a colour the way the menu expects: blue in the top byte, alpha in the bottom
pub fn bgra(blue: u8, green: u8, red: u8, alpha: u8) -> u32 {
    (blue as u32) << 24 | (green as u32) << 16 | (red as u32) << 8 | alpha as u32
}

/// Colour of the gateway's own buttons (paging, dashboard)
pub fn default_button_color() -> u32 {
    bgra(214, 171, 94, 255)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldMenu {
    text: String,
}

impl WorldMenu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup_simple_menu(mut self) -> Self {
        self.text.push_str("setup_simple_menu\n");
        self
    }

    pub fn heading(mut self, text: &str) -> Self {
        self.text.push_str(&format!("add_heading|{}\n", text));
        self
    }

    pub fn button(self, text: &str, name: &str, scale: f64, color: u32) -> Self {
        self.line(&Self::button_line(text, name, scale, color))
    }

    /// A button line on its own, newline included
    pub fn button_line(text: &str, name: &str, scale: f64, color: u32) -> String {
        format!("add_button|{}|{}|{:.6}|{}\n", text, name, scale, color)
    }

    /// Appends an already rendered line
    pub fn line(mut self, line: &str) -> Self {
        self.text.push_str(line);
        self
    }

    pub fn build(self) -> String {
        self.text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Small,
    Large,
    Big,
}

impl Size {
    fn as_str(self) -> &'static str {
        match self {
            Size::Small => "small",
            Size::Large => "large",
            Size::Big => "big",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Center,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Center => "center",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dialog {
    text: String,
}

impl Dialog {
    pub fn new() -> Self {
        Self::default()
    }

    fn line(mut self, line: String) -> Self {
        self.text.push_str(&line);
        self.text.push('\n');
        self
    }

    /// Colour code applied to text that does not set its own
    pub fn default_color(self, code: char) -> Self {
        self.line(format!("set_default_color|`{}", code))
    }

    pub fn label(self, size: Size, text: &str, direction: Direction) -> Self {
        self.line(format!("add_label|{}|{}|{}|", size.as_str(), text, direction.as_str()))
    }

    pub fn small_text(self, text: &str) -> Self {
        self.line(format!("add_smalltext|{}|left|", text))
    }

    pub fn spacer(self, size: Size) -> Self {
        self.line(format!("add_spacer|{}|", size.as_str()))
    }

    pub fn button(self, name: &str, text: &str) -> Self {
        self.line(format!("add_button|{}|{}|noflags|0|0|", name, text))
    }

    pub fn checkbox(self, name: &str, text: &str, checked: bool) -> Self {
        self.line(format!("add_checkbox|{}|{}|{}", name, text, checked as u8))
    }

    pub fn text_input(self, name: &str, label: &str, value: &str, max_len: usize) -> Self {
        self.line(format!("add_text_input|{}|{}|{}|{}|", name, label, value, max_len))
    }

    /// Hidden field echoed back by the client in its `dialog_return`
    pub fn embed(self, name: &str, value: &str) -> Self {
        self.line(format!("embed_data|{}|{}", name, value))
    }

    /// Closes the dialog. `dialog_name` comes back as the return's `dialog_name` field.
    pub fn end(self, dialog_name: &str, cancel: &str, accept: &str) -> Self {
        self.line(format!("end_dialog|{}|{}|{}|", dialog_name, cancel, accept))
    }

    pub fn build(self) -> String {
        self.text
    }
}
