//! Talos factory image selection.
//!
//! The OS image comes from the Talos image factory as a pre-built raw
//! image per architecture, identified by a schematic id. Only the
//! architectures actually used by a pool are uploaded.

use basalt_config::CpuArchitecture;

use crate::error::{CloudError, CloudResult};
use crate::provider::ImageHandle;

/// Factory schematic for the plain Hetzner Talos image.
const DEFAULT_IMAGE_ID: &str = "376567988ad370138ad8b2698212367b8edcb69b5fd68c80be1f2ec7d603b4ba";
/// Factory schematic with the Longhorn extensions (iscsi-tools,
/// util-linux-tools).
const LONGHORN_IMAGE_ID: &str = "613e1592b2da41ae5e265e8789429f22e121aab91cb4deb6bc3c0b6262961245";

/// Resolve the factory schematic id: explicit override first, then the
/// Longhorn variant when Longhorn support is on, otherwise the default.
pub fn talos_image_id(image_id_override: Option<&str>, enable_longhorn: bool) -> String {
    if let Some(id) = image_id_override {
        return id.to_string();
    }
    if enable_longhorn {
        return LONGHORN_IMAGE_ID.to_string();
    }
    DEFAULT_IMAGE_ID.to_string()
}

/// Download URL of the raw Hetzner image for one architecture.
pub fn factory_image_url(image_id: &str, talos_version: &str, arch: CpuArchitecture) -> String {
    format!("https://factory.talos.dev/image/{image_id}/{talos_version}/hcloud-{arch}.raw.xz")
}

/// Which architectures the given pools require.
///
/// Returns `(arm64, amd64)`. Pools are expected to be normalized (arch
/// filled in).
pub fn required_architectures<I>(architectures: I) -> (bool, bool)
where
    I: IntoIterator<Item = CpuArchitecture>,
{
    let mut arm64 = false;
    let mut amd64 = false;
    for arch in architectures {
        match arch {
            CpuArchitecture::Arm64 => arm64 = true,
            CpuArchitecture::Amd64 => amd64 = true,
        }
    }
    (arm64, amd64)
}

/// The uploaded Talos images for the cluster, by architecture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Images {
    pub arm: Option<ImageHandle>,
    pub x86: Option<ImageHandle>,
    /// Factory schematic id the images were built from.
    pub talos_image_id: String,
}

impl Images {
    /// The image for an architecture; an error when that architecture was
    /// never uploaded.
    pub fn for_arch(&self, arch: CpuArchitecture) -> CloudResult<&ImageHandle> {
        let image = match arch {
            CpuArchitecture::Arm64 => self.arm.as_ref(),
            CpuArchitecture::Amd64 => self.x86.as_ref(),
        };
        image.ok_or(CloudError::MissingImage { arch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_longhorn() {
        assert_eq!(talos_image_id(Some("abc123"), true), "abc123");
    }

    #[test]
    fn longhorn_selects_the_extension_schematic() {
        assert_eq!(talos_image_id(None, true), LONGHORN_IMAGE_ID);
        assert_eq!(talos_image_id(None, false), DEFAULT_IMAGE_ID);
    }

    #[test]
    fn factory_url_embeds_schematic_version_and_arch() {
        let url = factory_image_url("abc123", "v1.9.2", CpuArchitecture::Arm64);
        assert_eq!(
            url,
            "https://factory.talos.dev/image/abc123/v1.9.2/hcloud-arm64.raw.xz"
        );
    }

    #[test]
    fn required_architectures_detects_both() {
        let (arm, x86) =
            required_architectures([CpuArchitecture::Arm64, CpuArchitecture::Amd64]);
        assert!(arm);
        assert!(x86);

        let (arm, x86) = required_architectures([CpuArchitecture::Amd64]);
        assert!(!arm);
        assert!(x86);
    }

    #[test]
    fn missing_image_is_an_error_naming_the_arch() {
        let images = Images {
            arm: None,
            x86: Some(ImageHandle {
                id: "img-1".to_string(),
            }),
            talos_image_id: "abc".to_string(),
        };
        assert!(images.for_arch(CpuArchitecture::Amd64).is_ok());
        let err = images.for_arch(CpuArchitecture::Arm64).unwrap_err();
        assert!(err.to_string().contains("arm64"));
    }
}
