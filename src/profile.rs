//! Build profiles.
//!
//! A profile pins everything one kernel flavour needs: the upstream release,
//! the config addendum, the patch list, the reproducible build identity and
//! the container settings. Profiles are TOML files; the router7 profile is
//! compiled in and used when no other profile is given.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::release::ReleaseDescriptor;

const BUILTIN_PROFILE: &str = include_str!("../profiles/router7.toml");
const BUILTIN_ADDENDUM: &str = include_str!("../profiles/router7.addendum");
const BUILTIN_ADDENDUM_NAME: &str = "router7.addendum";

/// Fixed identity injected into kbuild so artifacts do not depend on who
/// built them, where, or when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildIdentity {
    pub user: String,
    pub host: String,
    pub timestamp: String,
}

impl Default for BuildIdentity {
    fn default() -> Self {
        Self {
            user: "gokrazy".to_string(),
            host: "docker".to_string(),
            timestamp: "Wed Mar  1 20:57:29 UTC 2017".to_string(),
        }
    }
}

impl BuildIdentity {
    /// The kbuild environment variables carrying this identity.
    pub fn env_pairs(&self) -> [(&'static str, &str); 3] {
        [
            ("KBUILD_BUILD_USER", self.user.as_str()),
            ("KBUILD_BUILD_HOST", self.host.as_str()),
            ("KBUILD_BUILD_TIMESTAMP", self.timestamp.as_str()),
        ]
    }
}

/// Where the builder executable staged into the container comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BuilderSource {
    /// Copy the running executable. It is linked against the host's glibc,
    /// so the base image's glibc must be at least as new.
    #[default]
    CurrentExe,
    /// Copy an already built executable.
    Prebuilt(PathBuf),
    /// Cross-compile this crate for the given target triple with cargo.
    CargoTarget(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ContainerSettings {
    pub engine: String,
    pub base_image: String,
    pub packages: Vec<String>,
    pub image_tag: String,
    pub mount_point: String,
    pub builder: BuilderSource,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            base_image: "debian:bookworm".to_string(),
            packages: [
                "build-essential",
                "bc",
                "libssl-dev",
                "bison",
                "flex",
                "libelf-dev",
                "ncurses-dev",
                "ca-certificates",
                "zstd",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            image_tag: "router-kernel-rebuild".to_string(),
            mount_point: "/tmp/buildresult".to_string(),
            builder: BuilderSource::CurrentExe,
        }
    }
}

/// On-disk form of a profile, before validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProfileToml {
    name: String,
    release: ReleaseDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    addendum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    addendum_file: Option<String>,
    #[serde(default)]
    patches: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    patch_extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defconfig_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reconcile_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_path: Option<String>,
    #[serde(default)]
    identity: BuildIdentity,
    #[serde(default)]
    container: ContainerSettings,
}

/// A validated build profile. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProfile {
    pub name: String,
    pub release: ReleaseDescriptor,
    /// Raw directives appended to the generated kernel config.
    pub addendum: String,
    /// Patch files for the orchestrator to stage, in application order.
    pub patches: Vec<String>,
    /// Extension used to discover patches in pipeline mode.
    pub patch_extension: String,
    pub image_target: String,
    /// Compiled image, relative to the source tree.
    pub image_path: PathBuf,
    pub defconfig_target: String,
    pub reconcile_target: String,
    pub output_path: PathBuf,
    pub identity: BuildIdentity,
    pub container: ContainerSettings,
}

impl BuildProfile {
    /// The compiled-in router7 profile.
    pub fn builtin() -> Result<Self> {
        let raw: ProfileToml =
            toml::from_str(BUILTIN_PROFILE).context("parsing built-in router7 profile")?;
        resolve(raw, |name| {
            if name == BUILTIN_ADDENDUM_NAME {
                Ok(BUILTIN_ADDENDUM.to_string())
            } else {
                bail!("built-in profile references unknown addendum '{}'", name)
            }
        })
        .context("validating built-in router7 profile")
    }

    /// Load a profile file. `addendum_file` is resolved relative to it.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading build profile '{}'", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&text, base_dir)
            .with_context(|| format!("invalid build profile '{}'", path.display()))
    }

    pub fn from_toml_str(text: &str, base_dir: &Path) -> Result<Self> {
        let raw: ProfileToml = toml::from_str(text)?;
        resolve(raw, |name| {
            let path = base_dir.join(name);
            fs::read_to_string(&path)
                .with_context(|| format!("reading config addendum '{}'", path.display()))
        })
    }

    /// Render the profile back to TOML with the addendum inlined, so it can
    /// be shipped somewhere the addendum file does not exist.
    pub fn to_toml_string(&self) -> Result<String> {
        let raw = ProfileToml {
            name: self.name.clone(),
            release: self.release.clone(),
            addendum: Some(self.addendum.clone()),
            addendum_file: None,
            patches: self.patches.clone(),
            patch_extension: Some(self.patch_extension.clone()),
            image_target: Some(self.image_target.clone()),
            image_path: Some(self.image_path.to_string_lossy().into_owned()),
            defconfig_target: Some(self.defconfig_target.clone()),
            reconcile_target: Some(self.reconcile_target.clone()),
            output_path: Some(self.output_path.to_string_lossy().into_owned()),
            identity: self.identity.clone(),
            container: self.container.clone(),
        };
        toml::to_string(&raw).context("serializing build profile")
    }

    /// File name the pipeline writes into the shared output directory.
    pub fn artifact_name(&self) -> &str {
        self.output_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("vmlinuz")
    }
}

fn resolve(raw: ProfileToml, read_addendum: impl Fn(&str) -> Result<String>) -> Result<BuildProfile> {
    if raw.name.trim().is_empty() {
        bail!("profile name must not be empty");
    }
    let addendum = match (raw.addendum, raw.addendum_file) {
        (Some(inline), None) => inline,
        (None, Some(file)) => read_addendum(file.trim())?,
        (Some(_), Some(_)) => bail!("set either 'addendum' or 'addendum_file', not both"),
        (None, None) => bail!("one of 'addendum' or 'addendum_file' is required"),
    };

    let mut seen = Vec::new();
    for patch in &raw.patches {
        let name = Path::new(patch)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("patch entry '{}' has no file name", patch))?;
        if seen.contains(&name) {
            bail!("patch file name '{}' is listed more than once", name);
        }
        seen.push(name);
    }

    let image_path = PathBuf::from(raw.image_path.as_deref().unwrap_or("arch/x86/boot/bzImage"));
    if image_path.is_absolute() {
        bail!(
            "image_path '{}' must be relative to the source tree",
            image_path.display()
        );
    }

    let output_path = PathBuf::from(raw.output_path.as_deref().unwrap_or("/tmp/buildresult/vmlinuz"));
    if output_path.file_name().is_none() {
        bail!("output_path '{}' must name a file", output_path.display());
    }
    if output_path.parent() != Some(Path::new(&raw.container.mount_point)) {
        bail!(
            "output_path '{}' must be directly inside container.mount_point '{}'",
            output_path.display(),
            raw.container.mount_point
        );
    }

    let identity = raw.identity;
    for (key, value) in identity.env_pairs() {
        if value.trim().is_empty() {
            bail!("build identity value for {} must not be empty", key);
        }
    }
    if raw.container.engine.trim().is_empty() || raw.container.image_tag.trim().is_empty() {
        bail!("container.engine and container.image_tag must not be empty");
    }

    Ok(BuildProfile {
        name: raw.name.trim().to_string(),
        release: raw.release,
        addendum,
        patches: raw.patches,
        patch_extension: raw.patch_extension.unwrap_or_else(|| "patch".to_string()),
        image_target: raw.image_target.unwrap_or_else(|| "bzImage".to_string()),
        image_path,
        defconfig_target: raw.defconfig_target.unwrap_or_else(|| "defconfig".to_string()),
        reconcile_target: raw
            .reconcile_target
            .unwrap_or_else(|| "olddefconfig".to_string()),
        output_path,
        identity,
        container: raw.container,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name = "test"
release = "https://example.org/linux-6.7.tar.xz"
addendum = "CONFIG_FOO=y\n"
"#;

    #[test]
    fn test_builtin_profile_resolves() {
        let profile = BuildProfile::builtin().unwrap();
        assert_eq!(profile.name, "router7");
        assert_eq!(profile.release.source_dir_name(), "linux-6.7");
        assert!(profile.addendum.contains("CONFIG_IGB=y"));
        assert_eq!(profile.image_path, PathBuf::from("arch/x86/boot/bzImage"));
        assert_eq!(profile.output_path, PathBuf::from("/tmp/buildresult/vmlinuz"));
        assert_eq!(profile.artifact_name(), "vmlinuz");
        assert_eq!(profile.identity, BuildIdentity::default());
    }

    #[test]
    fn test_minimal_profile_uses_defaults() {
        let profile = BuildProfile::from_toml_str(MINIMAL, Path::new(".")).unwrap();
        assert_eq!(profile.image_target, "bzImage");
        assert_eq!(profile.defconfig_target, "defconfig");
        assert_eq!(profile.reconcile_target, "olddefconfig");
        assert_eq!(profile.patch_extension, "patch");
        assert!(profile.patches.is_empty());
        assert_eq!(profile.container, ContainerSettings::default());
    }

    #[test]
    fn test_addendum_file_is_relative_to_profile() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::write(temp.path().join("extra.config"), "CONFIG_BAR=m\n").unwrap();
        let profile_path = temp.path().join("custom.toml");
        fs::write(
            &profile_path,
            "name = \"custom\"\nrelease = \"https://example.org/linux-6.7.tar.gz\"\naddendum_file = \"extra.config\"\n",
        )
        .unwrap();

        let profile = BuildProfile::load(&profile_path).unwrap();
        assert_eq!(profile.addendum, "CONFIG_BAR=m\n");
    }

    #[test]
    fn test_addendum_sources_are_exclusive() {
        let both = format!("{}addendum_file = \"x\"\n", MINIMAL);
        assert!(BuildProfile::from_toml_str(&both, Path::new(".")).is_err());

        let neither = "name = \"t\"\nrelease = \"https://example.org/linux-6.7.tar.xz\"\n";
        assert!(BuildProfile::from_toml_str(neither, Path::new(".")).is_err());
    }

    #[test]
    fn test_rejects_unknown_fields_and_bad_paths() {
        let unknown = format!("{}colour = \"blue\"\n", MINIMAL);
        assert!(BuildProfile::from_toml_str(&unknown, Path::new(".")).is_err());

        let absolute_image = format!("{}image_path = \"/boot/bzImage\"\n", MINIMAL);
        assert!(BuildProfile::from_toml_str(&absolute_image, Path::new(".")).is_err());

        let outside_mount = format!("{}output_path = \"/srv/vmlinuz\"\n", MINIMAL);
        assert!(BuildProfile::from_toml_str(&outside_mount, Path::new(".")).is_err());

        let duplicate = format!("{}patches = [\"a/0001.patch\", \"b/0001.patch\"]\n", MINIMAL);
        assert!(BuildProfile::from_toml_str(&duplicate, Path::new(".")).is_err());
    }

    #[test]
    fn test_rejects_unusable_release_urls() {
        for release in [
            "https://example.org/",
            "https://example.org/linux-6.7.zip",
            "linux-6.7.tar.xz",
        ] {
            let text = format!("name = \"t\"\nrelease = \"{}\"\naddendum = \"\"\n", release);
            let err = BuildProfile::from_toml_str(&text, Path::new(".")).unwrap_err();
            assert!(format!("{:#}", err).contains("release"), "{release}: {err:#}");
        }
    }

    #[test]
    fn test_builtin_profile_documents_static_builder_options() {
        let profile = BuildProfile::builtin().unwrap();
        assert_eq!(profile.container.builder, BuilderSource::CurrentExe);
        // The alternatives named in the profile comments must parse.
        for line in BUILTIN_PROFILE.lines().filter(|l| l.starts_with("#   builder = ")) {
            let text = format!("{}[container]\n{}\n", MINIMAL, line.trim_start_matches("#   "));
            let parsed = BuildProfile::from_toml_str(&text, Path::new(".")).unwrap();
            assert_ne!(parsed.container.builder, BuilderSource::CurrentExe);
        }
    }

    #[test]
    fn test_builder_source_variants_parse() {
        let prebuilt = format!(
            "{}[container]\nbuilder = {{ prebuilt = \"/opt/router-kernel\" }}\n",
            MINIMAL
        );
        let profile = BuildProfile::from_toml_str(&prebuilt, Path::new(".")).unwrap();
        assert_eq!(
            profile.container.builder,
            BuilderSource::Prebuilt(PathBuf::from("/opt/router-kernel"))
        );

        let cargo = format!(
            "{}[container]\nbuilder = {{ cargo-target = \"x86_64-unknown-linux-musl\" }}\n",
            MINIMAL
        );
        let profile = BuildProfile::from_toml_str(&cargo, Path::new(".")).unwrap();
        assert_eq!(
            profile.container.builder,
            BuilderSource::CargoTarget("x86_64-unknown-linux-musl".to_string())
        );
    }

    #[test]
    fn test_rendered_profile_is_self_contained() {
        let profile = BuildProfile::builtin().unwrap();
        let rendered = profile.to_toml_string().unwrap();
        assert!(!rendered.contains("addendum_file"));

        // Parsing from an unrelated directory must not need the addendum file.
        let temp = tempfile::TempDir::new().unwrap();
        let reparsed = BuildProfile::from_toml_str(&rendered, temp.path()).unwrap();
        assert_eq!(reparsed, profile);
    }
}
