//! The view of a running container that digest comparison needs

/// Image metadata of a local container
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageInfo {
    /// Repository digests of the local image, as `<repository>@<algorithm>:<hex>`
    pub repo_digests: Vec<String>,
}

/// A container whose image may be out of date.
///
/// Implemented by whatever collaborator ingests container metadata from the
/// container engine.
pub trait Container {
    /// Name of the container, used in diagnostics
    fn name(&self) -> &str;

    /// The raw image reference the container was created from
    fn image_name(&self) -> &str;

    /// Metadata of the local image, if it has been inspected
    fn image_info(&self) -> Option<&ImageInfo>;

    /// Whether image metadata is available
    fn has_image_info(&self) -> bool {
        self.image_info().is_some()
    }
}
