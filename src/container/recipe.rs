//! Container build recipe (Dockerfile) for the throwaway builder image.

/// Directory inside the image holding patches and the staged profile. Also
/// the pipeline's working directory.
pub const CONTAINER_WORK_DIR: &str = "/usr/src";

/// Name of the staged profile inside the build context.
pub const STAGED_PROFILE: &str = "profile.toml";

/// Inputs to the rendered recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeParams {
    pub base_image: String,
    pub packages: Vec<String>,
    /// File name of the builder executable in the build context.
    pub builder: String,
    /// File names of the staged patches, in application order.
    pub patches: Vec<String>,
    pub uid: u32,
    pub gid: u32,
}

impl RecipeParams {
    /// Render the Dockerfile.
    ///
    /// The synthetic `builduser` carries the caller's uid/gid so whatever the
    /// container writes into the shared output directory is owned by the
    /// caller on the host.
    pub fn render(&self) -> String {
        let mut out = format!("FROM {}\n\n", self.base_image);

        if !self.packages.is_empty() {
            out.push_str(&format!(
                "RUN apt-get update && apt-get install -y {}\n\n",
                self.packages.join(" ")
            ));
        }

        out.push_str(&format!("COPY {0} /usr/bin/{0}\n", self.builder));
        out.push_str(&format!("COPY {0} {1}/{0}\n", STAGED_PROFILE, CONTAINER_WORK_DIR));
        for patch in &self.patches {
            out.push_str(&format!("COPY {0} {1}/{0}\n", patch, CONTAINER_WORK_DIR));
        }
        out.push('\n');

        out.push_str(&format!(
            "RUN echo 'builduser:x:{uid}:{gid}:nobody:/:/bin/sh' >> /etc/passwd && \\\n    chown -R {uid}:{gid} {dir}\n\n",
            uid = self.uid,
            gid = self.gid,
            dir = CONTAINER_WORK_DIR
        ));

        out.push_str("USER builduser\n");
        out.push_str(&format!("WORKDIR {}\n", CONTAINER_WORK_DIR));
        out.push_str(&format!(
            "ENTRYPOINT [\"/usr/bin/{}\", \"build\", \"--profile\", \"{}/{}\"]\n",
            self.builder, CONTAINER_WORK_DIR, STAGED_PROFILE
        ));
        out
    }
}
