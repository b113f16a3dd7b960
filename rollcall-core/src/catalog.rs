use crate::compare;
use crate::encoder::{Embedding, FaceEncoder};
use crate::store::{BlobStore, PersonRecord};
use std::collections::BTreeMap;

/// Who a probe encoding belongs to
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Known { name: String, distance: f32 },
    /// No reference within threshold; `best_distance` is None for an empty catalog
    Unknown { best_distance: Option<f32> },
}

/// Reference encodings keyed by person name.
///
/// Built once from the stored person records and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCatalog {
    entries: BTreeMap<String, Embedding>,
}

impl ReferenceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the reference image of every person record.
    ///
    /// Records without a name, without a resolvable image, with an image that
    /// does not decode, or with no detectable face are skipped. Only the first
    /// face of each image is kept. When a name appears twice the first usable
    /// record wins.
    pub fn build<E: FaceEncoder + ?Sized>(
        people: &[PersonRecord],
        blobs: &BlobStore,
        encoder: &mut E,
    ) -> Self {
        let mut catalog = Self::new();

        for person in people {
            let name = person.name.trim();
            if name.is_empty() {
                log::debug!("Skipping person record {} without a name", person.id);
                continue;
            }
            if catalog.entries.contains_key(name) {
                log::warn!(
                    "Ignoring duplicate reference for {} (record {})",
                    name,
                    person.id
                );
                continue;
            }
            let Some(image_id) = &person.image else {
                log::warn!("Skipping {}: no image reference", name);
                continue;
            };

            let data = match blobs.get(image_id) {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("Skipping {}: {}", name, e);
                    continue;
                }
            };

            let image = match image::load_from_memory(&data) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    log::warn!("Skipping {}: image decode failed: {}", name, e);
                    continue;
                }
            };

            let faces = match encoder.detect_and_encode(&image) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("Skipping {}: {}", name, e);
                    continue;
                }
            };

            match faces.into_iter().next() {
                Some(face) => {
                    log::debug!("Loaded reference encoding for {}", name);
                    catalog.insert(name, face.encoding);
                }
                None => log::warn!("Skipping {}: no face found in reference image", name),
            }
        }

        log::info!(
            "Reference catalog ready: {} of {} record(s) usable",
            catalog.len(),
            people.len()
        );
        catalog
    }

    pub fn insert(&mut self, name: impl Into<String>, encoding: Embedding) {
        self.entries.insert(name.into(), encoding);
    }

    pub fn get(&self, name: &str) -> Option<&Embedding> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Match a probe against every reference; the nearest one wins if it is
    /// within `threshold`.
    pub fn identify(&self, probe: &Embedding, threshold: f32) -> Identification {
        let names: Vec<&String> = self.entries.keys().collect();
        match compare::match_faces(probe, self.entries.values(), threshold) {
            Some(outcome) if outcome.matched => Identification::Known {
                name: names[outcome.best_index].clone(),
                distance: outcome.distance,
            },
            Some(outcome) => Identification::Unknown {
                best_distance: Some(outcome.distance),
            },
            None => Identification::Unknown {
                best_distance: None,
            },
        }
    }
}
