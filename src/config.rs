use crate::template::{CommandTemplate, TemplateError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Configuration file at the root of the repository.
pub const GLOBAL_CONFIG_FILE: &str = "global.toml";
/// Configuration file inside each site directory.
pub const SITE_CONFIG_FILE: &str = "site.toml";
/// Directory holding all sites, relative to the repository root.
pub const SITES_DIR: &str = "sites";
/// Directory holding the synchronized files of a site, relative to the site directory.
pub const SITE_FILES_DIR: &str = "files";
/// Section holding the commands and shared items.
pub const GLOBAL_SECTION: &str = "global";

pub const UPDATE_COMMAND: &str = "update_command";
pub const REMOTE_EXISTS: &str = "remote_exists";
pub const ORIG_FILE_COMMAND: &str = "orig_file_command";
pub const REMOTE_DIFF: &str = "remote_diff";
const COMMAND_KEYS: &[&str] = &[UPDATE_COMMAND, REMOTE_EXISTS, ORIG_FILE_COMMAND, REMOTE_DIFF];

/// Parameters filled in for every synchronized file, on top of the `global` section items.
pub const BUILTIN_PARAMS: &[&str] = &[
    "git_root",
    "site_root",
    "site",
    "local_file",
    "remote_file",
    "repo_file",
];
/// Path of the fetched remote copy, only available to `remote_diff`.
pub const ORIG_FILE_PARAM: &str = "orig_file";

const SPECIAL_GIT_ROOT: &str = "{git_root}";
const SPECIAL_SITE_ROOT: &str = "{site_root}";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "no global configuration found at {}; run `sitesync init` to create one",
        .path.display()
    )]
    MissingGlobalConfig { path: PathBuf },
    #[error("cannot read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot load {} as TOML", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("section [{section}] is missing in both site `{site}` and global configuration")]
    MissingSection { site: String, section: String },
    #[error(
        "option `{key}` of section [{section}] is missing in both site `{site}` and global configuration"
    )]
    MissingOption {
        site: String,
        section: String,
        key: String,
    },
    #[error("unknown site `{0}`")]
    UnknownSite(String),
    #[error("invalid `{key}` for site `{site}`")]
    Template {
        site: String,
        key: String,
        #[source]
        source: TemplateError,
    },
}

/// One configuration file: named sections of string options.
#[derive(serde::Deserialize, Debug, Default, Clone)]
#[serde(transparent)]
pub struct ConfigFile {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ConfigFile {
    pub fn parse(data: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn section(&self, section: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(section)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .and_then(|items| items.get(key))
            .map(String::as_str)
    }
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ConfigFile::parse(&data, path)
}

/// The four commands driving the synchronization of a file.
#[derive(Debug, Clone)]
pub struct SyncCommands {
    pub update: CommandTemplate,
    pub remote_exists: CommandTemplate,
    pub orig_file: CommandTemplate,
    pub remote_diff: CommandTemplate,
}

/// Everything needed to synchronize the files of one site, resolved at load time.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Flattened `global` section, special tokens already substituted.
    pub items: BTreeMap<String, String>,
    pub commands: SyncCommands,
}

/// Global and per-site configuration of a repository.
pub struct Config {
    git_root: PathBuf,
    sites_root: PathBuf,
    global: ConfigFile,
    sites: BTreeMap<String, ConfigFile>,
    profiles: BTreeMap<String, SiteProfile>,
}

impl Config {
    /// Loads the global configuration and the configuration of every directory under
    /// the sites root. A site without a configuration file only uses global values.
    pub fn load(git_root: &Path) -> Result<Self, ConfigError> {
        let global_path = git_root.join(GLOBAL_CONFIG_FILE);
        if !global_path.is_file() {
            return Err(ConfigError::MissingGlobalConfig { path: global_path });
        }
        let global = load_config_file(&global_path)?;

        let sites_root = git_root.join(SITES_DIR);
        let mut sites = BTreeMap::new();
        if sites_root.is_dir() {
            let entries = std::fs::read_dir(&sites_root).map_err(|source| ConfigError::Io {
                path: sites_root.clone(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| ConfigError::Io {
                    path: sites_root.clone(),
                    source,
                })?;
                if !entry.path().is_dir() {
                    continue;
                }
                let site = entry.file_name().to_string_lossy().to_string();
                let site_path = entry.path().join(SITE_CONFIG_FILE);
                let config = if site_path.is_file() {
                    load_config_file(&site_path)?
                } else {
                    tracing::debug!("site `{site}` has no {SITE_CONFIG_FILE}, using global values");
                    ConfigFile::default()
                };
                sites.insert(site, config);
            }
        }

        Self::new(git_root.to_path_buf(), global, sites)
    }

    /// Builds a configuration from already parsed files and validates the commands of
    /// every site.
    pub fn new(
        git_root: PathBuf,
        global: ConfigFile,
        sites: BTreeMap<String, ConfigFile>,
    ) -> Result<Self, ConfigError> {
        let sites_root = git_root.join(SITES_DIR);
        let mut config = Self {
            git_root,
            sites_root,
            global,
            sites,
            profiles: BTreeMap::new(),
        };
        let mut profiles = BTreeMap::new();
        for site in config.sites.keys() {
            profiles.insert(site.clone(), config.build_profile(site)?);
        }
        config.profiles = profiles;
        Ok(config)
    }

    fn build_profile(&self, site: &str) -> Result<SiteProfile, ConfigError> {
        let items = self.items(site, GLOBAL_SECTION)?;

        let command = |key: &str| -> Result<CommandTemplate, ConfigError> {
            let source = items.get(key).ok_or_else(|| ConfigError::MissingOption {
                site: site.to_string(),
                section: GLOBAL_SECTION.to_string(),
                key: key.to_string(),
            })?;
            let template_error = |source: TemplateError| ConfigError::Template {
                site: site.to_string(),
                key: key.to_string(),
                source,
            };
            let template = CommandTemplate::parse(source).map_err(template_error)?;
            template
                .validate(|param| {
                    items.contains_key(param)
                        || BUILTIN_PARAMS.contains(&param)
                        || (key == REMOTE_DIFF && param == ORIG_FILE_PARAM)
                })
                .map_err(template_error)?;
            Ok(template)
        };

        let commands = SyncCommands {
            update: command(UPDATE_COMMAND)?,
            remote_exists: command(REMOTE_EXISTS)?,
            orig_file: command(ORIG_FILE_COMMAND)?,
            remote_diff: command(REMOTE_DIFF)?,
        };
        Ok(SiteProfile { items, commands })
    }

    fn site_config(&self, site: &str) -> Result<&ConfigFile, ConfigError> {
        self.sites
            .get(site)
            .ok_or_else(|| ConfigError::UnknownSite(site.to_string()))
    }

    /// Value of `key` in `section`, taken from the site configuration first and from the
    /// global configuration otherwise.
    pub fn get(&self, site: &str, section: &str, key: &str) -> Result<&str, ConfigError> {
        let site_config = self.site_config(site)?;
        if let Some(value) = site_config
            .get(section, key)
            .or_else(|| self.global.get(section, key))
        {
            return Ok(value);
        }
        if !self.has_section(site, section) {
            return Err(ConfigError::MissingSection {
                site: site.to_string(),
                section: section.to_string(),
            });
        }
        Err(ConfigError::MissingOption {
            site: site.to_string(),
            section: section.to_string(),
            key: key.to_string(),
        })
    }

    pub fn has_section(&self, site: &str, section: &str) -> bool {
        self.sites
            .get(site)
            .is_some_and(|config| config.section(section).is_some())
            || self.global.section(section).is_some()
    }

    /// All items of `section`, site values overriding global ones, with `{git_root}` and
    /// `{site_root}` replaced in the values. Command templates are left as written.
    pub fn items(
        &self,
        site: &str,
        section: &str,
    ) -> Result<BTreeMap<String, String>, ConfigError> {
        let site_section = self.site_config(site)?.section(section);
        let global_section = self.global.section(section);
        if site_section.is_none() && global_section.is_none() {
            return Err(ConfigError::MissingSection {
                site: site.to_string(),
                section: section.to_string(),
            });
        }

        let specials = [
            (SPECIAL_GIT_ROOT, self.git_root.to_string_lossy().to_string()),
            (SPECIAL_SITE_ROOT, self.site_root(site).to_string_lossy().to_string()),
        ];
        let mut items = BTreeMap::new();
        for (key, value) in global_section.into_iter().chain(site_section).flatten() {
            let mut value = value.clone();
            // Commands are templates, which resolve these tokens as parameters.
            let is_command = section == GLOBAL_SECTION && COMMAND_KEYS.contains(&key.as_str());
            if !is_command {
                for (token, replacement) in &specials {
                    if value.contains(token) {
                        value = value.replace(token, replacement);
                    }
                }
            }
            items.insert(key.clone(), value);
        }
        Ok(items)
    }

    /// Remote path of a synchronized file: the `dst` option of its section, or its path
    /// relative to the site file tree.
    pub fn destination(&self, site: &str, relative_path: &str) -> Result<String, ConfigError> {
        match self.get(site, relative_path, "dst") {
            Ok(dst) => Ok(dst.to_string()),
            Err(ConfigError::MissingOption { .. } | ConfigError::MissingSection { .. }) => {
                Ok(relative_path.to_string())
            }
            Err(error) => Err(error),
        }
    }

    pub fn profile(&self, site: &str) -> Result<&SiteProfile, ConfigError> {
        self.profiles
            .get(site)
            .ok_or_else(|| ConfigError::UnknownSite(site.to_string()))
    }

    pub fn git_root(&self) -> &Path {
        &self.git_root
    }

    pub fn sites_root(&self) -> &Path {
        &self.sites_root
    }

    pub fn site_root(&self, site: &str) -> PathBuf {
        self.sites_root.join(site)
    }

    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }
}

const GLOBAL_CONFIG_TEMPLATE: &str = r#"# Configuration of the sitesync pre-commit hook.
#
# Commands are run with `sh -c` from the repository root. They can use the
# parameters {local_file}, {remote_file}, {repo_file}, {site}, {site_root},
# {git_root} and every other key of the [global] section. `remote_diff` can also
# use {orig_file}, the fetched copy printed by `orig_file_command`.
# Each site can override any of these values in sites/<site>/site.toml.

[global]
host = "user@example.org"
remote_root = "/var/www"
update_command = "scp -q {local_file} {host}:{remote_root}{remote_file}"
remote_exists = "ssh {host} 'test -e {remote_root}{remote_file} && echo yes || echo no'"
orig_file_command = "f=$(mktemp) && scp -q {host}:{remote_root}{remote_file} $f && echo $f"
remote_diff = "git show HEAD:{repo_file} | diff - {orig_file}"

# Files under sites/<site>/files are synchronized only when a section named
# after their relative path exists. `dst` overrides the remote path.
#
# ["/index.html"]
# dst = "/index.html"
"#;

/// Writes a starter global configuration.
pub fn write_template(path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    std::fs::write(path, GLOBAL_CONFIG_TEMPLATE)
        .with_context(|| format!("cannot write config to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GLOBAL: &str = r#"
[global]
host = "global-host"
backup = "{git_root}/backup"
site_dir = "{site_root}/files"
update_command = "cp {local_file} {host}{remote_file}"
remote_exists = "echo no"
orig_file_command = "echo {backup}"
remote_diff = "diff {orig_file} {local_file}"

["/global-only.html"]
dst = "/elsewhere.html"

["/no-dst.html"]
"#;

    const SITE: &str = r#"
[global]
host = "site-host"

["/site-only.html"]
"#;

    fn config() -> Config {
        let root = PathBuf::from("/repo");
        let global = ConfigFile::parse(GLOBAL, Path::new("global.toml")).unwrap();
        let site = ConfigFile::parse(SITE, Path::new("site.toml")).unwrap();
        let sites = BTreeMap::from([
            ("blog".to_string(), site),
            ("bare".to_string(), ConfigFile::default()),
        ]);
        Config::new(root, global, sites).unwrap()
    }

    #[test]
    fn global_only_key_is_returned() {
        let config = config();
        assert_eq!(
            config.get("blog", "/global-only.html", "dst").unwrap(),
            "/elsewhere.html"
        );
    }

    #[test]
    fn site_value_overrides_global_value() {
        let config = config();
        assert_eq!(config.get("blog", "global", "host").unwrap(), "site-host");
        assert_eq!(config.get("bare", "global", "host").unwrap(), "global-host");
    }

    #[test]
    fn key_absent_everywhere_is_an_error() {
        let config = config();
        assert!(matches!(
            config.get("blog", "global", "nope"),
            Err(ConfigError::MissingOption { .. })
        ));
        assert!(matches!(
            config.get("blog", "/missing.html", "dst"),
            Err(ConfigError::MissingSection { .. })
        ));
        assert!(matches!(
            config.get("unknown", "global", "host"),
            Err(ConfigError::UnknownSite(_))
        ));
    }

    #[test]
    fn sections_are_looked_up_in_both_scopes() {
        let config = config();
        assert!(config.has_section("blog", "/site-only.html"));
        assert!(config.has_section("blog", "/global-only.html"));
        assert!(!config.has_section("bare", "/site-only.html"));
        assert!(!config.has_section("blog", "/missing.html"));
    }

    #[test]
    fn items_substitute_special_tokens() {
        let config = config();
        let items = config.items("blog", "global").unwrap();
        assert_eq!(items["host"], "site-host");
        assert_eq!(items["backup"], "/repo/backup");
        assert_eq!(items["site_dir"], "/repo/sites/blog/files");
    }

    #[test]
    fn escaped_tokens_in_commands_stay_literal() {
        let global = ConfigFile::parse(
            &GLOBAL.replace("echo no", "printf '{{git_root}}' && echo {git_root}"),
            Path::new("global.toml"),
        )
        .unwrap();
        let sites = BTreeMap::from([("blog".to_string(), ConfigFile::default())]);
        let config = Config::new(PathBuf::from("/repo"), global, sites).unwrap();
        let context = BTreeMap::from([("git_root".to_string(), "/repo".to_string())]);
        assert_eq!(
            config
                .profile("blog")
                .unwrap()
                .commands
                .remote_exists
                .render(&context)
                .unwrap(),
            "printf '{git_root}' && echo /repo"
        );
    }

    #[test]
    fn destination_defaults_to_relative_path() {
        let config = config();
        assert_eq!(
            config.destination("blog", "/global-only.html").unwrap(),
            "/elsewhere.html"
        );
        assert_eq!(
            config.destination("blog", "/no-dst.html").unwrap(),
            "/no-dst.html"
        );
    }

    #[test]
    fn profiles_hold_resolved_commands() {
        let config = config();
        let profile = config.profile("blog").unwrap();
        assert_eq!(
            profile.commands.update.source(),
            "cp {local_file} {host}{remote_file}"
        );
        assert_eq!(profile.items["host"], "site-host");
        assert_eq!(config.sites().collect::<Vec<_>>(), vec!["bare", "blog"]);
    }

    #[test]
    fn unknown_command_parameter_fails_at_load() {
        let global = ConfigFile::parse(
            &GLOBAL.replace("cp {local_file}", "cp {locl_file}"),
            Path::new("global.toml"),
        )
        .unwrap();
        let sites = BTreeMap::from([("blog".to_string(), ConfigFile::default())]);
        let err = Config::new(PathBuf::from("/repo"), global, sites)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::Template {
                ref key,
                source: TemplateError::UnknownParameter { ref name, .. },
                ..
            } if key == UPDATE_COMMAND && name == "locl_file"
        ));
    }

    #[test]
    fn orig_file_is_only_known_to_remote_diff() {
        let global = ConfigFile::parse(
            &GLOBAL.replace("echo no", "echo {orig_file}"),
            Path::new("global.toml"),
        )
        .unwrap();
        let sites = BTreeMap::from([("blog".to_string(), ConfigFile::default())]);
        assert!(matches!(
            Config::new(PathBuf::from("/repo"), global, sites),
            Err(ConfigError::Template { ref key, .. }) if key == REMOTE_EXISTS
        ));
    }

    #[test]
    fn missing_command_fails_at_load() {
        let global = ConfigFile::parse(
            &GLOBAL.replace("remote_exists = \"echo no\"\n", ""),
            Path::new("global.toml"),
        )
        .unwrap();
        let sites = BTreeMap::from([("blog".to_string(), ConfigFile::default())]);
        assert!(matches!(
            Config::new(PathBuf::from("/repo"), global, sites),
            Err(ConfigError::MissingOption { ref key, .. }) if key == REMOTE_EXISTS
        ));
    }

    #[test]
    fn non_string_values_are_rejected() {
        let err = ConfigFile::parse("[global]\nport = 22\n", Path::new("global.toml"));
        assert!(matches!(err, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn load_requires_global_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ConfigError::MissingGlobalConfig { .. })
        ));
    }

    #[test]
    fn load_reads_every_site() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(GLOBAL_CONFIG_FILE), GLOBAL).unwrap();
        let blog = dir.path().join(SITES_DIR).join("blog");
        std::fs::create_dir_all(&blog).unwrap();
        std::fs::write(blog.join(SITE_CONFIG_FILE), SITE).unwrap();
        std::fs::create_dir_all(dir.path().join(SITES_DIR).join("shop")).unwrap();
        std::fs::write(dir.path().join(SITES_DIR).join("README"), "").unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.sites().collect::<Vec<_>>(), vec!["blog", "shop"]);
        assert_eq!(config.get("blog", "global", "host").unwrap(), "site-host");
        assert_eq!(config.get("shop", "global", "host").unwrap(), "global-host");
        assert_eq!(
            config.items("shop", "global").unwrap()["backup"],
            format!("{}/backup", dir.path().display())
        );
    }

    #[test]
    fn starter_template_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        write_template(&dir.path().join(GLOBAL_CONFIG_FILE)).unwrap();
        std::fs::create_dir_all(dir.path().join(SITES_DIR).join("www")).unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert!(config.profile("www").is_ok());
    }
}
