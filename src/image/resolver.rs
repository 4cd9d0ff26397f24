//! Makes sure a container's image is available locally

use crate::config::types::ContainerImageConfig;
use crate::error::{HomelabError, Result};
use crate::runtime::{ContainerRuntime, PullProgress};
use futures::StreamExt;
use std::sync::Arc;
use tracing::Level;

/// What [`ImageResolver::ensure`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    /// Pull skipped by config, local copy used
    Skipped,
    /// Pulled with progress shown
    Pulled,
    /// Pulled silently, local copy already current
    Unchanged,
    /// Pulled silently, a newer image with this ID replaced the local copy
    Updated(String),
    /// Pull failed but the failure is ignored and a local copy exists
    KeptLocal,
}

/// Append `:latest` when the reference has neither tag nor digest
pub fn normalize_reference(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

pub struct ImageResolver {
    runtime: Arc<dyn ContainerRuntime>,
    platform: String,
}

impl ImageResolver {
    /// `platform` is the Docker platform to pull for, e.g. `linux/amd64`
    pub fn new(runtime: Arc<dyn ContainerRuntime>, platform: impl Into<String>) -> Self {
        Self {
            runtime,
            platform: platform.into(),
        }
    }

    #[tracing::instrument(skip_all, fields(image = %options.image))]
    pub async fn ensure(&self, options: &ContainerImageConfig) -> Result<ImageOutcome> {
        let image = normalize_reference(&options.image);
        let before = self.local_id(&image).await?;

        if options.skip_image_pull {
            return match before {
                Some(_) => {
                    tracing::debug!("Skipping image pull");
                    Ok(ImageOutcome::Skipped)
                }
                None => Err(HomelabError::ImagePull {
                    image,
                    message: "image pulls are skipped and no local copy exists".to_string(),
                }),
            };
        }

        let verbose = tracing::enabled!(Level::DEBUG) || before.is_none();
        if let Err(e) = self.pull(&image, verbose).await {
            if options.ignore_image_pull_failures && before.is_some() {
                tracing::warn!(error = %e, "Ignoring image pull failure, using the local copy");
                return Ok(ImageOutcome::KeptLocal);
            }
            return Err(e);
        }

        let after = self.local_id(&image).await?.ok_or_else(|| {
            HomelabError::Internal(format!(
                "Image {} is not available locally after a successful pull",
                image
            ))
        })?;

        if verbose {
            return Ok(ImageOutcome::Pulled);
        }
        if before.as_deref() == Some(after.as_str()) {
            tracing::debug!("Image is up to date");
            Ok(ImageOutcome::Unchanged)
        } else {
            tracing::info!(id = %after, "Pulled newer version of image");
            Ok(ImageOutcome::Updated(after))
        }
    }

    async fn local_id(&self, image: &str) -> Result<Option<String>> {
        let images = self.runtime.list_images(image).await?;
        Ok(images.into_iter().next().map(|summary| summary.id))
    }

    async fn pull(&self, image: &str, verbose: bool) -> Result<()> {
        if verbose {
            tracing::info!(platform = %self.platform, "Pulling image");
        }

        let mut progress = self.runtime.pull_image(image, &self.platform);
        while let Some(item) = progress.next().await {
            let item = item?;
            if verbose {
                show_progress(&item);
            }
        }
        Ok(())
    }
}

fn show_progress(item: &PullProgress) {
    match (&item.layer, &item.progress) {
        (Some(layer), Some(progress)) => {
            tracing::info!(layer = %layer, "{} {}", item.status, progress)
        }
        (Some(layer), None) => tracing::info!(layer = %layer, "{}", item.status),
        _ => tracing::info!("{}", item.status),
    }
}
