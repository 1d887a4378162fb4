//! Installed images.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Command listing the images installed on a host, as JSON.
pub const IMAGES_COMMAND: &str = "imgadm list -j";

/// One OS or template image known to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub uuid: Uuid,
    pub name: Option<String>,
    pub version: Option<String>,
    pub os: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    manifest: Option<Manifest>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    uuid: Option<String>,
    name: Option<String>,
    version: Option<String>,
    os: Option<String>,
}

/// Parses the `imgadm list -j` output of one host.
///
/// Entries without a manifest or with an invalid uuid are skipped. The
/// error case is reserved for output that is not a JSON array of objects.
pub fn parse_images(output: &str) -> Result<Vec<Image>, serde_json::Error> {
    let entries: Vec<ImageEntry> = serde_json::from_str(output)?;

    let images = entries
        .into_iter()
        .filter_map(|entry| {
            let manifest = entry.manifest?;
            let raw = manifest.uuid?;
            match Uuid::parse_str(&raw) {
                Ok(uuid) => Some(Image {
                    uuid,
                    name: manifest.name,
                    version: manifest.version,
                    os: manifest.os,
                }),
                Err(_) => {
                    debug!("Skipping image with invalid uuid {:?}", raw);
                    None
                }
            }
        })
        .collect();

    Ok(images)
}
