use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::UploadError;
use crate::order::{Order, Website};
use crate::sanitize::redact_path;
use crate::tagger::{cut_tags, Tagger};

use super::caption::{substitute_keywords, CaptionContext};
use super::registry::UploaderRegistry;
use super::UploadPayload;

pub const EXTENSION_FILE_NAME: &str = "download_link.txt";
pub const ARCHIVE_FILE_NAME: &str = "download_link.zip";

/// What later Orders may reference from an earlier delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredOrder {
    pub upload_index: usize,
    pub dst_url: String,
    pub images: usize,
}

/// Delivers Orders one after another, remembering earlier deliveries for
/// caption keywords.
pub struct UploadDispatcher {
    registry: UploaderRegistry,
    tagger: Tagger,
    outputs_dir: PathBuf,
    history: Vec<DeliveredOrder>,
    all_number: usize,
}

impl UploadDispatcher {
    pub fn new(registry: UploaderRegistry, tagger: Tagger, outputs_dir: PathBuf) -> Self {
        Self {
            registry,
            tagger,
            outputs_dir,
            history: Vec::new(),
            all_number: 0,
        }
    }

    pub fn registry(&self) -> &UploaderRegistry {
        &self.registry
    }

    pub fn history(&self) -> &[DeliveredOrder] {
        &self.history
    }

    pub fn all_number(&self) -> usize {
        self.all_number
    }

    pub fn caption_context(&self, order: &Order) -> CaptionContext {
        CaptionContext {
            url: self
                .history
                .last()
                .map(|delivered| delivered.dst_url.clone())
                .unwrap_or_default(),
            number: order.len(),
            all_number: self.all_number,
        }
    }

    /// Tags, packs and uploads a finished Order. Sets `dst_url` on success.
    pub fn dispatch(&mut self, order: &mut Order) -> Result<String, UploadError> {
        let upload_index = order.upload_index();
        let website = order.info().website;

        let active = order.sort_by_active().len();
        if active > 0 {
            return Err(UploadError::Incomplete {
                index: upload_index,
                active,
            });
        }
        if !self.registry.contains(website) {
            return Err(UploadError::Unsupported {
                index: upload_index,
                name: website.to_string(),
            });
        }

        let analysis = self.tagger.tag_order(order)?;
        let context = self.caption_context(order);

        let caption = if order.info().caption.is_empty() {
            debug!(upload_index, "Using tag analysis as caption");
            analysis.to_caption()
        } else {
            substitute_keywords(&order.info().caption, &context)
        };

        let mut files = order.paths();
        if let Some(missing) = files.iter().find(|path| !path.exists()) {
            return Err(UploadError::MissingFile(missing.clone()));
        }

        let extension_text = &order.info().extension_file_context;
        if !extension_text.is_empty() {
            if website.supports_extension_file() {
                let text = substitute_keywords(extension_text, &context);
                let path = self.write_extension_file(&text)?;
                order.extension_file_path = Some(path.clone());
                files.push(path);
            } else {
                warn!(upload_index, %website, "Website does not take an extension file, skipping it");
            }
        }

        if order.info().packer_enable {
            if website.supports_packing() {
                let start = order.info().packer_start_pos.min(files.len());
                let archive = self.outputs_dir.join(ARCHIVE_FILE_NAME);
                pack_files(&files[start..], &archive)?;
                files.truncate(start);
                files.push(archive);
            } else {
                warn!(upload_index, %website, "Website does not accept archives, uploading files individually");
            }
        }

        let keep = [analysis.source.clone(), analysis.character.clone()];
        let tags = cut_tags(
            &analysis.other,
            &keep,
            website.tag_limit(),
            self.tagger.front_tags(),
            self.tagger.last_tags(),
        );

        let payload = UploadPayload {
            website,
            title: analysis.title(),
            caption,
            tags,
            files,
            adult: order.info().is_adult(),
        };

        let uploader = self
            .registry
            .get_mut(website)
            .ok_or_else(|| UploadError::Unsupported {
                index: upload_index,
                name: website.to_string(),
            })?;
        let url = uploader.start_upload(&payload)?;

        if website == Website::Test {
            return Ok(url);
        }

        info!(upload_index, %website, url = %url, "Upload finished");
        order.dst_url = url.clone();
        self.history.push(DeliveredOrder {
            upload_index,
            dst_url: url.clone(),
            images: order.len(),
        });
        self.all_number += order.len();

        Ok(url)
    }

    fn write_extension_file(&self, text: &str) -> Result<PathBuf, UploadError> {
        let path = self.outputs_dir.join(EXTENSION_FILE_NAME);
        fs::create_dir_all(&self.outputs_dir)
            .and_then(|_| fs::write(&path, text))
            .map_err(|e| UploadError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }
}

/// Stores `files` flat (by file name) into a new archive at `archive`.
pub fn pack_files(files: &[PathBuf], archive: &Path) -> Result<(), UploadError> {
    let failed = |reason: String| UploadError::Archive {
        path: archive.to_path_buf(),
        reason,
    };

    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
    }
    let file = File::create(archive).map_err(|e| failed(e.to_string()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| failed(format!("bad file name: {}", path.display())))?;
        zip.start_file(name, options).map_err(|e| failed(e.to_string()))?;

        let mut source = File::open(path).map_err(|e| failed(e.to_string()))?;
        io::copy(&mut source, &mut zip).map_err(|e| failed(e.to_string()))?;
        debug!("Packed {}", redact_path(path));
    }

    zip.finish().map_err(|e| failed(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaggerConfig;
    use crate::error::TagError;
    use crate::order::{Image, UploadBlock, UploadInfo};
    use crate::tagger::{AutoConfirm, TagAnalysis, TagAnalyzer};
    use crate::upload::Uploader;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct FixedAnalyzer;

    impl TagAnalyzer for FixedAnalyzer {
        fn analyze(&mut self, _tags: &[String]) -> Result<TagAnalysis, TagError> {
            Ok(TagAnalysis {
                source: "src".to_string(),
                character: "chr".to_string(),
                other: (0..20).map(|i| format!("t{}", i)).collect(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct Recording(Rc<RefCell<Vec<UploadPayload>>>);

    impl Uploader for Recording {
        fn start_upload(&mut self, payload: &UploadPayload) -> Result<String, UploadError> {
            let mut seen = self.0.borrow_mut();
            seen.push(payload.clone());
            Ok(format!("https://example.com/{}", seen.len()))
        }
    }

    fn dispatcher(tmp: &TempDir, site: Website) -> (UploadDispatcher, Recording) {
        let recording = Recording::default();
        let mut registry = UploaderRegistry::new();
        registry.register(site, Box::new(recording.clone()));
        let tagger = Tagger::new(Box::new(FixedAnalyzer), Box::new(AutoConfirm), &TaggerConfig::default());
        (
            UploadDispatcher::new(registry, tagger, tmp.path().join("outputs")),
            recording,
        )
    }

    fn finished_order(tmp: &TempDir, block: Value) -> Order {
        let number = block["number"].as_u64().unwrap() as usize;
        let block: UploadBlock = serde_json::from_value(block).unwrap();
        let info = UploadInfo::from_block(0, block).unwrap();
        let images = (0..number)
            .map(|i| {
                let path = tmp.path().join(format!("{}.jpg", i));
                std::fs::write(&path, b"jpeg").unwrap();
                let mut image = Image::new(i, 2);
                image.output_path = Some(path);
                image
            })
            .collect();
        let mut order = Order::restore(info, images);
        order.task_info = json!({ "5": { "text": ["a,b"] } });
        order
    }

    #[test]
    fn test_refuses_incomplete_order() {
        let tmp = TempDir::new().unwrap();
        let (mut dispatcher, recording) = dispatcher(&tmp, Website::Pixiv);
        let mut order = finished_order(
            &tmp,
            json!({ "target": { "website_name": "pixiv" }, "number": 2, "batch": 1 }),
        );
        order.image_mut(1).unwrap().output_path = None;

        let err = dispatcher.dispatch(&mut order).unwrap_err();
        assert!(matches!(err, UploadError::Incomplete { active: 1, .. }));
        assert!(recording.0.borrow().is_empty());
    }

    #[test]
    fn test_pixiv_payload_and_history() {
        let tmp = TempDir::new().unwrap();
        let (mut dispatcher, recording) = dispatcher(&tmp, Website::Pixiv);
        let mut first = finished_order(
            &tmp,
            json!({ "target": { "website_name": "pixiv" }, "number": 2, "batch": 1, "sfw_level_num": 0 }),
        );
        let url = dispatcher.dispatch(&mut first).unwrap();

        assert_eq!(url, "https://example.com/1");
        assert_eq!(first.dst_url, url);
        let payload = recording.0.borrow()[0].clone();
        assert_eq!(payload.title, "src chr");
        assert!(payload.adult);
        assert_eq!(payload.tags.len(), 10);
        assert_eq!(&payload.tags[8..], &["src".to_string(), "chr".to_string()]);
        assert!(payload.caption.starts_with("src chr t"));

        let mut second = finished_order(
            &tmp,
            json!({
                "target": { "website_name": "pixiv", "caption": "prev %url% now %number% total %all_number%" },
                "number": 1,
                "batch": 1
            }),
        );
        dispatcher.dispatch(&mut second).unwrap();
        assert_eq!(
            recording.0.borrow()[1].caption,
            "prev https://example.com/1 now 1 total 2"
        );
        assert_eq!(dispatcher.all_number(), 3);
        assert_eq!(dispatcher.history().len(), 2);
    }

    #[test]
    fn test_booth_packs_files_with_extension() {
        let tmp = TempDir::new().unwrap();
        let (mut dispatcher, recording) = dispatcher(&tmp, Website::Booth);
        let mut order = finished_order(
            &tmp,
            json!({
                "target": {
                    "website_name": "booth",
                    "packer_enable": true,
                    "packer_start_pos": 1,
                    "extension_file_context": "images: %number%"
                },
                "number": 3,
                "batch": 1
            }),
        );

        dispatcher.dispatch(&mut order).unwrap();

        let payload = recording.0.borrow()[0].clone();
        assert_eq!(payload.files.len(), 2);
        assert!(payload.files[1].ends_with(ARCHIVE_FILE_NAME));

        let extension = order.extension_file_path.clone().unwrap();
        assert_eq!(std::fs::read_to_string(&extension).unwrap(), "images: 3");

        let archive = zip::ZipArchive::new(File::open(&payload.files[1]).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert_eq!(names, vec!["1.jpg", "2.jpg", EXTENSION_FILE_NAME]);
    }

    #[test]
    fn test_packing_unsupported_uploads_individually() {
        let tmp = TempDir::new().unwrap();
        let (mut dispatcher, recording) = dispatcher(&tmp, Website::Pixiv);
        let mut order = finished_order(
            &tmp,
            json!({
                "target": { "website_name": "pixiv", "packer_enable": true, "packer_start_pos": 1 },
                "number": 2,
                "batch": 1
            }),
        );

        dispatcher.dispatch(&mut order).unwrap();
        assert_eq!(recording.0.borrow()[0].files.len(), 2);
        assert!(!tmp.path().join("outputs").join(ARCHIVE_FILE_NAME).exists());
    }

    #[test]
    fn test_test_site_skips_history() {
        let tmp = TempDir::new().unwrap();
        let (mut dispatcher, _) = dispatcher(&tmp, Website::Pixiv);
        let mut order = finished_order(
            &tmp,
            json!({ "target": { "website_name": "test" }, "number": 1, "batch": 1 }),
        );

        let url = dispatcher.dispatch(&mut order).unwrap();
        assert_eq!(url, "");
        assert!(dispatcher.history().is_empty());
        assert_eq!(dispatcher.all_number(), 0);
    }

    #[test]
    fn test_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let (mut dispatcher, _) = dispatcher(&tmp, Website::Pixiv);
        let mut order = finished_order(
            &tmp,
            json!({ "target": { "website_name": "pixiv" }, "number": 1, "batch": 1 }),
        );
        std::fs::remove_file(tmp.path().join("0.jpg")).unwrap();

        assert!(matches!(
            dispatcher.dispatch(&mut order),
            Err(UploadError::MissingFile(_))
        ));
    }
}
