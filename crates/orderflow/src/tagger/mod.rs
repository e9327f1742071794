//! Prompt-tag extraction and LLM-backed tag analysis.
//!
//! The tags an Order was generated from live in its `task_info`. They are
//! cleaned up (`prepare_tags`), sent to a [`TagAnalyzer`] that sorts them into
//! source, character and the rest, and the result becomes the post title,
//! fallback caption and tag list of the upload.

pub mod llm;
pub mod prompt;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::TaggerConfig;
use crate::error::TagError;
use crate::order::Order;
use crate::workflow::collect_string_lists;

pub use llm::{parse_json_robustly, OpenAiTagAnalyzer};
pub use prompt::{AutoConfirm, OperatorPrompt, StdinPrompt};

/// Tags that never reach the analyzer or the upload.
pub const FILTERED_TAGS: [&str; 3] = ["penis", "pussy", "sex"];

/// Registered analyzer implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggerProvider {
    OpenAi,
}

impl TaggerProvider {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Some(TaggerProvider::OpenAi),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaggerProvider::OpenAi => "openai",
        }
    }
}

/// Analyzer output: which work and character the image shows, plus every
/// other tag translated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagAnalysis {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub other: Vec<String>,
}

impl TagAnalysis {
    /// `[source, character, other...]`
    pub fn all_tags(&self) -> Vec<String> {
        let mut tags = Vec::with_capacity(self.other.len() + 2);
        tags.push(self.source.clone());
        tags.push(self.character.clone());
        tags.extend(self.other.iter().cloned());
        tags
    }

    pub fn to_caption(&self) -> String {
        self.all_tags().join(" ")
    }

    pub fn title(&self) -> String {
        format!("{} {}", self.source, self.character)
    }

    /// Source and character are both required.
    pub fn validate(&self) -> Result<(), TagError> {
        if self.source.trim().is_empty() {
            return Err(TagError::MissingField("source"));
        }
        if self.character.trim().is_empty() {
            return Err(TagError::MissingField("character"));
        }
        Ok(())
    }
}

pub trait TagAnalyzer {
    fn analyze(&mut self, tags: &[String]) -> Result<TagAnalysis, TagError>;
}

/// Every tag in the `text` lists of a generation response, in order.
pub fn extract_prompt_tags(task_info: &Value) -> Vec<String> {
    collect_string_lists(task_info, "text")
        .into_iter()
        .flatten()
        .flat_map(|text| {
            text.split(',')
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Drops `remove` and [`FILTERED_TAGS`], appends missing `add` tags and
/// removes duplicates, keeping first occurrences.
pub fn prepare_tags(tags: &[String], remove: &[String], add: &[String]) -> Vec<String> {
    let mut prepared: Vec<String> = Vec::with_capacity(tags.len() + add.len());

    for tag in tags.iter().chain(add) {
        let dropped = remove.contains(tag) || FILTERED_TAGS.contains(&tag.as_str());
        if !dropped && !prepared.contains(tag) {
            prepared.push(tag.clone());
        }
    }

    prepared
}

/// `front ++ other[..room] ++ keep ++ last`, where `room` is what `limit`
/// leaves after the fixed tags. Without a limit nothing is cut.
pub fn cut_tags(
    other: &[String],
    keep: &[String],
    limit: Option<usize>,
    front: &[String],
    last: &[String],
) -> Vec<String> {
    let fixed = front.len() + keep.len() + last.len();
    let room = limit.map_or(other.len(), |limit| limit.saturating_sub(fixed));

    front
        .iter()
        .chain(other.iter().take(room))
        .chain(keep)
        .chain(last)
        .cloned()
        .collect()
}

/// Runs analysis for an Order, with operator confirmation when interactive.
pub struct Tagger {
    analyzer: Box<dyn TagAnalyzer>,
    prompt: Box<dyn OperatorPrompt>,
    global_remove: Vec<String>,
    global_add: Vec<String>,
    front_tags: Vec<String>,
    last_tags: Vec<String>,
}

impl Tagger {
    pub fn new(
        analyzer: Box<dyn TagAnalyzer>,
        prompt: Box<dyn OperatorPrompt>,
        config: &TaggerConfig,
    ) -> Self {
        Self {
            analyzer,
            prompt,
            global_remove: config.global_remove_default_tags.clone(),
            global_add: config.global_add_default_tags.clone(),
            front_tags: config.front_tags.clone(),
            last_tags: config.last_tags.clone(),
        }
    }

    /// Builds the configured analyzer. Fails when the provider is unknown or
    /// the API key cannot be resolved.
    pub fn from_config(config: &TaggerConfig, proxy: Option<&str>) -> Result<Self, TagError> {
        let analyzer: Box<dyn TagAnalyzer> = match TaggerProvider::from_name(&config.provider) {
            Some(TaggerProvider::OpenAi) => Box::new(OpenAiTagAnalyzer::from_config(config, proxy)?),
            None => return Err(TagError::UnsupportedProvider(config.provider.clone())),
        };
        let prompt: Box<dyn OperatorPrompt> = if config.interactive {
            Box::new(StdinPrompt)
        } else {
            Box::new(AutoConfirm)
        };
        Ok(Self::new(analyzer, prompt, config))
    }

    pub fn front_tags(&self) -> &[String] {
        &self.front_tags
    }

    pub fn last_tags(&self) -> &[String] {
        &self.last_tags
    }

    pub fn tag_order(&mut self, order: &Order) -> Result<TagAnalysis, TagError> {
        let upload_index = order.upload_index();
        let raw = extract_prompt_tags(&order.task_info);
        if raw.is_empty() {
            return Err(TagError::NoTags);
        }

        let info = order.info();
        let remove: Vec<String> = info
            .remove_default_tags
            .iter()
            .chain(&self.global_remove)
            .cloned()
            .collect();
        let add: Vec<String> = info
            .add_default_tags
            .iter()
            .chain(&self.global_add)
            .cloned()
            .collect();
        if remove.is_empty() && add.is_empty() {
            info!(upload_index, "No default tags to add or remove");
        }

        let tags = prepare_tags(&raw, &remove, &add);
        debug!(upload_index, ?tags, "Prepared prompt tags");

        let mut analysis = loop {
            match self.analyzer.analyze(&tags).and_then(|a| a.validate().map(|_| a)) {
                Ok(analysis) => break analysis,
                Err(e) => {
                    warn!(upload_index, "Tag analysis failed: {}", e);
                    if !self.prompt.retry_after(&e) {
                        return Err(if self.prompt.is_interactive() {
                            TagError::Aborted
                        } else {
                            e
                        });
                    }
                }
            }
        };

        let mut rng = rand::rng();
        loop {
            analysis.other.shuffle(&mut rng);
            debug!(upload_index, tags = %analysis.to_caption(), "Tag analysis result");
            if self.prompt.accept(&analysis) {
                return Ok(analysis);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Image, UploadBlock, UploadInfo};
    use serde_json::json;
    use std::collections::VecDeque;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    struct Scripted {
        results: VecDeque<Result<TagAnalysis, TagError>>,
        seen: Vec<Vec<String>>,
    }

    impl TagAnalyzer for Scripted {
        fn analyze(&mut self, tags: &[String]) -> Result<TagAnalysis, TagError> {
            self.seen.push(tags.to_vec());
            self.results
                .pop_front()
                .unwrap_or(Err(TagError::Request("exhausted".to_string())))
        }
    }

    struct Answers {
        retry: bool,
        accept_after: usize,
    }

    impl OperatorPrompt for Answers {
        fn retry_after(&mut self, _error: &TagError) -> bool {
            self.retry
        }

        fn accept(&mut self, _analysis: &TagAnalysis) -> bool {
            if self.accept_after == 0 {
                return true;
            }
            self.accept_after -= 1;
            false
        }
    }

    fn analysis() -> TagAnalysis {
        TagAnalysis {
            source: "原神".to_string(),
            character: "フリーナ".to_string(),
            other: strings(&["笑顔", "青い目"]),
        }
    }

    fn order_with_tags(remove: &[&str]) -> Order {
        let block: UploadBlock = serde_json::from_value(json!({
            "target": { "website_name": "test" },
            "number": 1,
            "batch": 1,
            "remove_default_tags": remove
        }))
        .unwrap();
        let info = UploadInfo::from_block(0, block).unwrap();
        let mut order = Order::restore(info, vec![Image::new(0, 2)]);
        order.task_info = json!({
            "12": { "text": ["genshin_impact,furina,smile,sex,", "smile, blue_eyes"] }
        });
        order
    }

    fn tagger(results: Vec<Result<TagAnalysis, TagError>>, prompt: Answers) -> Tagger {
        Tagger::new(
            Box::new(Scripted {
                results: results.into(),
                seen: Vec::new(),
            }),
            Box::new(prompt),
            &TaggerConfig::default(),
        )
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(TaggerProvider::from_name("OpenAI"), Some(TaggerProvider::OpenAi));
        assert_eq!(TaggerProvider::from_name("baidu"), None);
    }

    #[test]
    fn test_extract_prompt_tags() {
        let task_info = json!({
            "3": { "text": ["a,b,,c"] },
            "7": { "inputs": { "text": "not a list" } },
            "9": { "nested": { "text": [" d "] } }
        });
        let tags = extract_prompt_tags(&task_info);
        assert_eq!(tags.len(), 4);
        assert!(tags.contains(&"d".to_string()));
    }

    #[test]
    fn test_prepare_tags_filters_and_dedupes() {
        let tags = strings(&["smile", "sex", "1girl", "smile", "hat"]);
        let prepared = prepare_tags(&tags, &strings(&["hat"]), &strings(&["1girl", "masterpiece"]));
        assert_eq!(prepared, strings(&["smile", "1girl", "masterpiece"]));
    }

    #[test]
    fn test_cut_tags_respects_limit() {
        let other = strings(&["a", "b", "c", "d"]);
        let keep = strings(&["src", "chr"]);
        let cut = cut_tags(&other, &keep, Some(5), &strings(&["AI"]), &strings(&["R-18"]));
        assert_eq!(cut, strings(&["AI", "a", "src", "chr", "R-18"]));
    }

    #[test]
    fn test_cut_tags_floors_at_zero() {
        let cut = cut_tags(&strings(&["a"]), &strings(&["x", "y"]), Some(1), &[], &[]);
        assert_eq!(cut, strings(&["x", "y"]));
    }

    #[test]
    fn test_cut_tags_without_limit_keeps_all() {
        let cut = cut_tags(&strings(&["a", "b"]), &strings(&["x"]), None, &[], &[]);
        assert_eq!(cut, strings(&["a", "b", "x"]));
    }

    #[test]
    fn test_analysis_caption_and_validation() {
        let a = analysis();
        assert_eq!(a.to_caption(), "原神 フリーナ 笑顔 青い目");
        assert_eq!(a.title(), "原神 フリーナ");
        assert!(a.validate().is_ok());

        let missing = TagAnalysis {
            character: String::new(),
            ..analysis()
        };
        assert!(matches!(missing.validate(), Err(TagError::MissingField("character"))));
    }

    #[test]
    fn test_tag_order_sends_prepared_tags() {
        let order = order_with_tags(&["blue_eyes"]);
        let tags = prepare_tags(
            &extract_prompt_tags(&order.task_info),
            &order.info().remove_default_tags,
            &[],
        );
        assert_eq!(tags, strings(&["genshin_impact", "furina", "smile"]));

        let mut tagger = tagger(vec![Ok(analysis())], Answers { retry: false, accept_after: 0 });
        let result = tagger.tag_order(&order).unwrap();
        assert_eq!(result.source, "原神");
        assert_eq!(result.other.len(), 2);
    }

    #[test]
    fn test_tag_order_retries_then_succeeds() {
        let order = order_with_tags(&[]);
        let mut tagger = tagger(
            vec![Err(TagError::InvalidResponse("prose".to_string())), Ok(analysis())],
            Answers { retry: true, accept_after: 2 },
        );
        assert!(tagger.tag_order(&order).is_ok());
    }

    #[test]
    fn test_tag_order_abort() {
        let order = order_with_tags(&[]);
        let bad = TagAnalysis {
            source: String::new(),
            ..analysis()
        };
        let mut tagger = tagger(vec![Ok(bad)], Answers { retry: false, accept_after: 0 });
        assert!(matches!(tagger.tag_order(&order), Err(TagError::Aborted)));
    }

    #[test]
    fn test_tag_order_without_tags() {
        let mut order = order_with_tags(&[]);
        order.task_info = Value::Null;
        let mut tagger = tagger(vec![], Answers { retry: true, accept_after: 0 });
        assert!(matches!(tagger.tag_order(&order), Err(TagError::NoTags)));
    }
}
