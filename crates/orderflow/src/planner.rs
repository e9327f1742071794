use std::path::Path;

use serde_json::{json, Value};
use tracing::{debug, error, info, info_span, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::GenerationError;
use crate::generation::GenerationBackend;
use crate::order::Order;
use crate::seed::{order_seed, random_seed, SeedSalt};
use crate::workflow::{WorkflowCatalog, WorkflowTemplate};

const SEED_KEY: &str = "seed";
const BATCH_SIZE_KEY: &str = "batch_size";

/// Splits `count` images into `count / batch` full batches followed by
/// `count % batch` single-image batches.
pub fn partition(count: usize, batch: usize) -> Option<Vec<usize>> {
    if batch == 0 {
        return None;
    }
    let full = count / batch;
    let single = count % batch;
    if full == 0 && single == 0 {
        return None;
    }

    let mut sizes = vec![batch; full];
    sizes.extend(std::iter::repeat(1).take(single));
    Some(sizes)
}

/// Turns the images of an order that still lack output into backend requests.
pub struct BatchPlanner<'a> {
    catalog: &'a WorkflowCatalog,
    store: &'a CheckpointStore,
    salt: SeedSalt,
}

impl<'a> BatchPlanner<'a> {
    pub fn new(catalog: &'a WorkflowCatalog, store: &'a CheckpointStore, salt: SeedSalt) -> Self {
        Self {
            catalog,
            store,
            salt,
        }
    }

    /// Generates every image without output. The order is checkpointed after
    /// each backend round trip. Returns the number of requests sent.
    pub fn run(
        &self,
        order: &mut Order,
        backend: &mut dyn GenerationBackend,
        output_dir: &Path,
    ) -> Result<usize, GenerationError> {
        let upload_index = order.upload_index();
        let pending = order.pending_generation();
        if pending.is_empty() {
            debug!(upload_index, "Nothing to generate");
            return Ok(0);
        }

        let batch = order.info().batch;
        let sizes = partition(pending.len(), batch).ok_or(GenerationError::InvalidBatch {
            index: upload_index,
            active: pending.len(),
            batch: batch as i64,
        })?;

        let seed = order_seed(self.salt, &order.info().uniform_string);
        info!(
            upload_index,
            "Generating {} images in {} requests", pending.len(), sizes.len()
        );

        let mut offset = 0;
        for (round, size) in sizes.iter().copied().enumerate() {
            let slice = &pending[offset..offset + size];
            offset += size;

            let span = info_span!("batch", index = round, size);
            let _guard = span.enter();
            debug!(upload_index, "{} requests left", sizes.len() - round);

            let template = self.prepare(order, slice, seed)?;
            let submission = backend.submit(&template, output_dir)?;

            if submission.output_paths.len() < size {
                return Err(GenerationError::PartialResult {
                    index: upload_index,
                    requested: size,
                    returned: submission.output_paths.len(),
                });
            }
            if submission.output_paths.len() > size {
                warn!(
                    upload_index,
                    "Backend returned {} outputs for {} images, ignoring the rest",
                    submission.output_paths.len(),
                    size
                );
            }

            for (index, path) in slice.iter().zip(submission.output_paths) {
                if let Some(image) = order.image_mut(*index) {
                    image.output_path = Some(path);
                }
            }
            order.task_info = submission.task_info;
            self.store.save_logged(order);
        }

        let missing = order.pending_generation().len();
        if missing > 0 {
            return Err(GenerationError::MissingOutputs {
                index: upload_index,
                missing,
            });
        }

        Ok(sizes.len())
    }

    /// Loads the template of the batch's first image and fills in batch size
    /// and seeds.
    fn prepare(
        &self,
        order: &Order,
        slice: &[usize],
        seed: u64,
    ) -> Result<WorkflowTemplate, GenerationError> {
        let upload_index = order.upload_index();
        let workflows: Vec<(usize, Option<&str>)> = slice
            .iter()
            .map(|index| {
                let name = order
                    .image(*index)
                    .and_then(|image| image.workflow_name.as_deref());
                (*index, name)
            })
            .collect();

        let (first_index, first) = workflows[0];
        let first = first.ok_or(GenerationError::NoWorkflow {
            index: upload_index,
            image: first_index,
        })?;

        if let Some((_, other)) = workflows.iter().find(|(_, name)| *name != Some(first)) {
            return Err(GenerationError::MixedWorkflow {
                index: upload_index,
                first: first.to_string(),
                other: other.unwrap_or_default().to_string(),
            });
        }

        let mut template = self.catalog.load(first)?;
        template.set_all(BATCH_SIZE_KEY, || json!(slice.len()));
        template.set_all(SEED_KEY, || json!(random_seed()));

        for pin in &order.info().fixed_node_seed_names {
            let Some(node_id) = node_id(pin) else {
                error!(upload_index, "Pinned seed node must be a string or integer, got {}", pin);
                continue;
            };
            template.set_node_input(&node_id, SEED_KEY, json!(seed))?;
        }

        Ok(template)
    }
}

fn node_id(pin: &Value) -> Option<String> {
    match pin {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}
