use tracing::{debug, warn};

/// Values available to `%keyword%` placeholders in captions and extension
/// file text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionContext {
    /// `%url%`: published URL of the previously delivered Order.
    pub url: String,
    /// `%number%`: image count of the current Order.
    pub number: usize,
    /// `%all_number%`: images delivered before the current Order.
    pub all_number: usize,
}

impl CaptionContext {
    fn values(&self) -> [(&'static str, String); 3] {
        let count = |n: usize| if n == 0 { String::new() } else { n.to_string() };
        [
            ("url", self.url.clone()),
            ("number", count(self.number)),
            ("all_number", count(self.all_number)),
        ]
    }
}

/// Replaces every known keyword present in `text`. A keyword whose value is
/// empty stays in place and is reported.
pub fn substitute_keywords(text: &str, context: &CaptionContext) -> String {
    let mut result = text.to_string();

    for (name, value) in context.values() {
        let keyword = format!("%{}%", name);
        if !result.contains(&keyword) {
            continue;
        }
        if value.is_empty() {
            warn!("No value for caption keyword {}", keyword);
            continue;
        }
        debug!("Replacing caption keyword {} with {}", keyword, value);
        result = result.replace(&keyword, &value);
    }

    result
}
