//! Manifest media types and manifest URL construction

use reqwest::Url;
use tracing::debug;

use crate::client::Client;
use crate::errors::{RegistryError, Result};
use crate::reference::ImageReference;

/// The mediatype for a Docker v2 schema 1 manifest.
pub const IMAGE_MANIFEST_V1_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v1+json";
/// The mediatype for a Docker v2 schema 2 manifest.
pub const IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// The mediatype for an OCI manifest.
pub const OCI_IMAGE_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// The mediatype for an OCI image index manifest.
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Media types sent in the `Accept` header of manifest requests
pub const MIME_TYPES_DISTRIBUTION_MANIFEST: &[&str] = &[
    IMAGE_MANIFEST_V1_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE,
    OCI_IMAGE_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
];

impl Client {
    /// Convert a reference to its v2 manifest URL.
    ///
    /// The reference must carry a tag. Hosts listed in
    /// `ClientConfig::host_aliases` are replaced by the host that actually
    /// serves their manifests.
    pub fn manifest_url(&self, reference: &ImageReference) -> Result<Url> {
        let host = self.manifest_host(reference.host());
        self.manifest_url_for_host(reference, host)
    }

    /// Host serving manifests for `host`, after alias substitution.
    pub(crate) fn manifest_host<'a>(&'a self, host: &'a str) -> &'a str {
        match self.config.host_aliases.get(host) {
            Some(alias) => {
                debug!(%host, %alias, "Using manifest host alias");
                alias.as_str()
            }
            None => host,
        }
    }

    pub(crate) fn manifest_url_for_host(
        &self,
        reference: &ImageReference,
        host: &str,
    ) -> Result<Url> {
        let tag = reference.require_tag()?;
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.config.protocol.scheme_for(host),
            host,
            reference.repository(),
            tag,
        );
        Url::parse(&url).map_err(|e| {
            RegistryError::invalid_reference(
                &reference.to_string(),
                format!("cannot build manifest URL {:?}: {}", url, e),
            )
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{ClientConfig, ClientProtocol};
    use rstest::rstest;

    #[rstest]
    #[case("nginx", "https://index.docker.io/v2/library/nginx/manifests/latest")]
    #[case("docker.io/nginx:1.25", "https://index.docker.io/v2/library/nginx/manifests/1.25")]
    #[case("ghcr.io/owner/repo:latest", "https://ghcr.io/v2/owner/repo/manifests/latest")]
    #[case("lscr.io/linuxserver/nginx", "https://ghcr.io/v2/linuxserver/nginx/manifests/latest")]
    #[case("localhost:5000/app:dev", "https://localhost:5000/v2/app/manifests/dev")]
    #[case(
        "quay.io/coreos/etcd:v3@sha256:ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        "https://quay.io/v2/coreos/etcd/manifests/v3"
    )]
    fn test_to_v2_manifest(#[case] image: &str, #[case] expected: &str) {
        let reference = ImageReference::parse(image).expect("failed to parse reference");
        let url = Client::default()
            .manifest_url(&reference)
            .expect("failed to build manifest URL");
        assert_eq!(url.as_str(), expected);
    }

    #[test]
    fn manifest_url_generation_respects_http_protocol() {
        let c = Client::new(ClientConfig {
            protocol: ClientProtocol::Http,
            ..Default::default()
        });
        let reference = ImageReference::parse("registry.local/hello:v1").unwrap();
        assert_eq!(
            c.manifest_url(&reference).unwrap().as_str(),
            "http://registry.local/v2/hello/manifests/v1"
        );
    }

    #[test]
    fn manifest_url_generation_uses_http_if_on_exception_list() {
        let c = Client::new(ClientConfig {
            protocol: ClientProtocol::HttpsExcept(vec!["registry.local".to_owned()]),
            ..Default::default()
        });
        let reference = ImageReference::parse("registry.local/hello:v1").unwrap();
        assert_eq!(
            c.manifest_url(&reference).unwrap().as_str(),
            "http://registry.local/v2/hello/manifests/v1"
        );
    }

    #[test]
    fn manifest_url_generation_uses_configured_aliases() {
        let mut config = ClientConfig::default();
        config.host_aliases.clear();
        config
            .host_aliases
            .insert("mirror.example".to_string(), "registry.example".to_string());
        let c = Client::new(config);

        let aliased = ImageReference::parse("mirror.example/team/app").unwrap();
        assert_eq!(
            c.manifest_url(&aliased).unwrap().as_str(),
            "https://registry.example/v2/team/app/manifests/latest"
        );
        let lscr = ImageReference::parse("lscr.io/linuxserver/nginx").unwrap();
        assert_eq!(c.manifest_url(&lscr).unwrap().host_str(), Some("lscr.io"));
    }

    #[test]
    fn manifest_url_requires_tag() {
        let reference = ImageReference::parse(
            "nginx@sha256:ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .unwrap();
        assert!(matches!(
            Client::default().manifest_url(&reference),
            Err(RegistryError::InvalidReference { .. })
        ));
    }
}
