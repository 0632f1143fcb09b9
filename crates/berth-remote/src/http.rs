use crate::{
    BinaryCache, InstalledRelease, PackageIndex, PackageInfo, ReleaseInstaller, RemoteConfig,
    RemoteError, ResolvedVersion,
};
use berth_schema::{current_system, StorePath};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

/// Shared GET/HEAD plumbing. `None` from [`get`](Self::get) means 404.
struct Client {
    agent: ureq::Agent,
    auth_token: Option<String>,
}

impl Client {
    fn new(auth_token: Option<String>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            auth_token,
        }
    }

    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut req = self
            .agent
            .get(url)
            .header("X-Berth-Protocol", &crate::PROTOCOL_VERSION.to_string());
        for (k, v) in query {
            req = req.query(*k, *v);
        }
        if let Some(ref token) = self.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => return Ok(None),
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => return Err(RemoteError::Http(e.to_string())),
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Ok(None);
        }
        if code >= 400 {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(Some(body))
    }

    fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, RemoteError> {
        let Some(body) = self.get(url, query)? else {
            return Ok(None);
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| RemoteError::Serialization(format!("{url}: {e}")))
    }

    fn head(&self, url: &str) -> Result<u16, RemoteError> {
        match self.agent.head(url).call() {
            Ok(resp) => Ok(resp.status().into()),
            Err(ureq::Error::StatusCode(code)) => Ok(code),
            Err(e) => Err(RemoteError::Http(e.to_string())),
        }
    }
}

/// Search service client.
///
/// - `GET /v1/resolve?name=<n>&version=<v>` → [`ResolvedVersion`]
/// - `GET /v1/pkg?name=<n>` → [`PackageInfo`]
pub struct HttpIndex {
    base_url: String,
    client: Client,
}

impl HttpIndex {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            base_url: config.search_url.clone(),
            client: Client::new(config.auth_token.clone()),
        }
    }
}

impl PackageIndex for HttpIndex {
    fn resolve(&self, name: &str, version: &str) -> Result<Option<ResolvedVersion>, RemoteError> {
        let url = format!("{}/v1/resolve", self.base_url);
        tracing::debug!("GET {url} name={name} version={version}");
        self.client
            .get_json(&url, &[("name", name), ("version", version)])
    }

    fn search(&self, name: &str) -> Result<Option<PackageInfo>, RemoteError> {
        let url = format!("{}/v1/pkg", self.base_url);
        tracing::debug!("GET {url} name={name}");
        self.client.get_json(&url, &[("name", name)])
    }
}

/// Probes `<cache>/<hash>.narinfo`.
pub struct HttpBinaryCache {
    base_url: String,
    client: Client,
}

impl HttpBinaryCache {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            base_url: config.cache_url.clone(),
            client: Client::new(None),
        }
    }
}

impl BinaryCache for HttpBinaryCache {
    fn has_store_path(&self, path: &StorePath) -> Result<bool, RemoteError> {
        let Some(hash) = path.hash_part() else {
            tracing::debug!("not a store path: {path}");
            return Ok(false);
        };
        let url = format!("{}/{hash}.narinfo", self.base_url);
        tracing::debug!("HEAD {url}");
        match self.client.head(&url)? {
            200 => Ok(true),
            404 => Ok(false),
            code => Err(RemoteError::Http(format!("HTTP {code} for HEAD {url}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

/// Whether a release asset name targets `system` (`<arch>-<os>`).
fn asset_matches(name: &str, system: &str) -> bool {
    let name = name.to_lowercase();
    let (arch, os) = system.split_once('-').unwrap_or((system, ""));
    let arch_aliases: &[&str] = match arch {
        "x86_64" => &["x86_64", "amd64", "x64"],
        "aarch64" => &["aarch64", "arm64"],
        "i686" => &["i686", "i386", "386"],
        "armv7l" => &["armv7", "armhf"],
        other => return name.contains(other),
    };
    let os_aliases: &[&str] = match os {
        "darwin" => &["darwin", "macos", "apple"],
        "linux" => &["linux"],
        _ => &[],
    };
    arch_aliases.iter().any(|a| name.contains(a)) && os_aliases.iter().any(|o| name.contains(o))
}

/// Installs release assets through the GitHub releases API.
pub struct GithubReleaseInstaller {
    api_url: String,
    system: String,
    client: Client,
}

impl GithubReleaseInstaller {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            api_url: config.releases_url.trim_end_matches('/').to_owned(),
            system: current_system(),
            client: Client::new(None),
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: &str) -> Self {
        system.clone_into(&mut self.system);
        self
    }

    fn fetch_release(&self, repo: &str, version: Option<&str>) -> Result<GithubRelease, RemoteError> {
        let Some(version) = version else {
            let url = format!("{}/repos/{repo}/releases/latest", self.api_url);
            return self
                .client
                .get_json(&url, &[])?
                .ok_or_else(|| RemoteError::NotFound(format!("no releases for {repo}")));
        };
        for tag in [version.to_owned(), format!("v{version}")] {
            let url = format!("{}/repos/{repo}/releases/tags/{tag}", self.api_url);
            if let Some(release) = self.client.get_json(&url, &[])? {
                return Ok(release);
            }
        }
        Err(RemoteError::NotFound(format!("{repo} release {version}")))
    }
}

impl ReleaseInstaller for GithubReleaseInstaller {
    fn install(
        &self,
        repo: &str,
        version: Option<&str>,
        dest: &Path,
    ) -> Result<InstalledRelease, RemoteError> {
        let release = self.fetch_release(repo, version)?;
        let asset = release
            .assets
            .iter()
            .find(|a| asset_matches(&a.name, &self.system))
            .ok_or_else(|| {
                RemoteError::NotFound(format!(
                    "{repo} {} has no asset for {}",
                    release.tag_name, self.system
                ))
            })?;
        tracing::info!("downloading {} from {repo} {}", asset.name, release.tag_name);
        let bytes = self
            .client
            .get(&asset.browser_download_url, &[])?
            .ok_or_else(|| RemoteError::NotFound(asset.browser_download_url.clone()))?;

        let dir = dest.join(repo.replace('/', "_")).join(&release.tag_name);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(&asset.name);
        std::fs::write(&path, &bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(InstalledRelease {
            version: release.tag_name,
            path,
        })
    }
}
