//! Line-oriented `key|value|...` text commands.
//!
//! Every line is kept, empty ones included, so `"ltoken|x\n"` has two lines and
//! `"action|refresh"` has one. Key promotion in the dispatcher depends on that count.

/// Parsed inbound text command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextScanner {
    lines: Vec<Vec<String>>,
}

/// C-style integer prefix parse: optional sign, then leading digits. Anything else is 0.
fn leading_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    if negative {
        -value
    } else {
        value
    }
}

impl TextScanner {
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return Self::default();
        }

        let lines = text
            .split('\n')
            .map(|line| {
                line.trim_end_matches('\r')
                    .split('|')
                    .map(str::to_string)
                    .collect()
            })
            .collect();

        Self { lines }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Field `index` of line `line`, or `""` when either is missing
    pub fn field(&self, line: usize, index: usize) -> &str {
        self.lines
            .get(line)
            .and_then(|fields| fields.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn find_line(&self, key: &str) -> Option<&Vec<String>> {
        self.lines
            .iter()
            .find(|fields| fields.first().is_some_and(|first| first == key))
    }

    /// Field `index` of the first line whose key is `key`, or `""`
    pub fn get(&self, key: &str, index: usize) -> &str {
        self.find_line(key)
            .and_then(|fields| fields.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn get_u32(&self, key: &str, index: usize) -> u32 {
        leading_int(self.get(key, index)) as u32
    }

    pub fn get_i32(&self, key: &str, index: usize) -> i32 {
        leading_int(self.get(key, index)) as i32
    }

    /// Checkbox-style flag: any non-zero integer is set
    pub fn get_flag(&self, key: &str) -> bool {
        self.get_i32(key, 1) != 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find_line(key).is_some()
    }

    /// Overwrites the value of the first line keyed `key`. Returns false if absent.
    pub fn replace(&mut self, key: &str, value: &str) -> bool {
        match self
            .lines
            .iter_mut()
            .find(|fields| fields.first().is_some_and(|first| first == key))
        {
            Some(fields) => {
                if fields.len() < 2 {
                    fields.resize(2, String::new());
                }
                fields[1] = value.to_string();
                true
            }
            None => false,
        }
    }
}
