//! Scraping of the socwall.com listing and detail pages.

use std::time::Duration;

use scraper::{Html, Selector};

use crate::config::Config;
use crate::error::{Error, Result};

/// Link to a wallpaper detail page as it appears on a listing page,
/// e.g. `/wallpapers/12345/some-title/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(href: impl Into<String>) -> Self {
        ImageRef(href.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Third `/`-delimited segment of the link path.
    pub fn image_id(&self) -> Result<&str> {
        let path = match self.0.split_once("://") {
            // Absolute link: drop scheme and host, keep "/path".
            Some((_, rest)) => rest.find('/').map(|idx| &rest[idx..]).unwrap_or(""),
            None => self.0.as_str(),
        };

        path.split('/')
            .nth(2)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::MalformedRef(self.0.clone()))
    }

    /// Deterministic local file name for this image.
    pub fn file_name(&self) -> Result<String> {
        Ok(format!("socwall-{}.jpg", sanitize_filename(self.image_id()?)))
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of wallpapers: page listings and per-image download links.
pub trait Gallery: Send + Sync {
    fn list_images(&self, page_number: u32) -> Result<Vec<ImageRef>>;

    fn resolve_download_url(&self, image: &ImageRef) -> Result<String>;
}

pub struct SocwallClient {
    base_url: String,
    user_agent: String,
    timeout: Duration,
}

impl SocwallClient {
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: config.settings.base_url.trim_end_matches('/').to_string(),
            user_agent: config.settings.user_agent.clone(),
            timeout: config.request_timeout(),
        }
    }

    pub fn listing_url(&self, page_number: u32) -> String {
        format!("{}/wallpapers/page:{}/", self.base_url, page_number)
    }

    pub fn detail_url(&self, image_id: &str) -> String {
        format!("{}/desktop-wallpaper/{}/wallpaper/", self.base_url, image_id)
    }

    fn fetch_html(&self, url: &str) -> Result<String> {
        let response = get(url, &self.user_agent, self.timeout)?;
        response.text().map_err(|e| Error::fetch(url, e))
    }
}

impl Gallery for SocwallClient {
    fn list_images(&self, page_number: u32) -> Result<Vec<ImageRef>> {
        let url = self.listing_url(page_number);
        let html = self.fetch_html(&url)?;
        let images = parse_image_refs(&html);
        log::debug!("Page {} lists {} images", page_number, images.len());
        Ok(images)
    }

    fn resolve_download_url(&self, image: &ImageRef) -> Result<String> {
        let image_id = image.image_id()?;
        let html = self.fetch_html(&self.detail_url(image_id))?;
        let href = parse_download_link(&html)
            .ok_or_else(|| Error::MissingDownloadLink(image_id.to_string()))?;
        Ok(absolute_url(&self.base_url, &href))
    }
}

/// GET with the browser user-agent and a whole-request timeout; non-2xx is an error.
pub(crate) fn get(url: &str, user_agent: &str, timeout: Duration) -> Result<attohttpc::Response> {
    let response = attohttpc::get(url)
        .header(attohttpc::header::USER_AGENT, user_agent)
        .timeout(timeout)
        .send()
        .map_err(|e| Error::fetch(url, e))?;

    if !response.is_success() {
        return Err(Error::fetch(url, format!("HTTP {}", response.status())));
    }
    Ok(response)
}

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

/// `href` of every `a.image` anchor on a listing page, in document order.
pub fn parse_image_refs(html: &str) -> Vec<ImageRef> {
    let document = Html::parse_document(html);
    let anchors = selector("a.image");

    document
        .select(&anchors)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .map(ImageRef::new)
        .collect()
}

/// `href` of the first `a.download` anchor on a detail page.
pub fn parse_download_link(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let anchors = selector("a.download");

    document
        .select(&anchors)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .map(str::to_string)
}

pub fn absolute_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix("//") {
        let scheme = base_url.split("://").next().unwrap_or("http");
        return format!("{}://{}", scheme, rest);
    }
    format!("{}/{}", base_url.trim_end_matches('/'), href.trim_start_matches('/'))
}

pub fn sanitize_filename(filename: &str) -> String {
    let sanitized = filename
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>();

    // Keep file names well under common filesystem limits
    if sanitized.len() > 100 {
        sanitized.chars().take(100).collect()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::testing::serve_once;
    use tempfile::TempDir;

    const LISTING: &str = r#"
        <html><body>
          <div class="wallpapers">
            <a class="image" href="/wallpapers/30101/misty-lake/"><img src="/t/30101.jpg"></a>
            <a class="title" href="/wallpapers/30101/misty-lake/">Misty lake</a>
            <a class="image" href="/wallpapers/30102/red-dunes/"><img src="/t/30102.jpg"></a>
            <a class="image" href="http://www.socwall.com/wallpapers/30103/night-city/"></a>
            <a class="image" href="">broken</a>
          </div>
        </body></html>"#;

    fn detail_page(href: &str) -> String {
        format!(
            r#"<html><body><div class="info">
                 <a class="share" href="/share/">share</a>
                 <a class="download" href="{href}">Download</a>
               </div></body></html>"#
        )
    }

    fn client_for(base_url: &str, temp_dir: &TempDir) -> SocwallClient {
        let settings = Settings {
            base_url: base_url.to_string(),
            request_timeout_secs: 5,
            ..Settings::default()
        };
        let config = Config::from_parts(
            temp_dir.path().join("config"),
            temp_dir.path().join("wallpapers"),
            None,
            settings,
        )
        .unwrap();
        SocwallClient::new(&config)
    }

    #[test]
    fn test_parse_image_refs_keeps_only_image_anchors() {
        let refs = parse_image_refs(LISTING);
        assert_eq!(
            refs,
            vec![
                ImageRef::new("/wallpapers/30101/misty-lake/"),
                ImageRef::new("/wallpapers/30102/red-dunes/"),
                ImageRef::new("http://www.socwall.com/wallpapers/30103/night-city/"),
            ]
        );
    }

    #[test]
    fn test_parse_image_refs_on_page_past_the_end() {
        assert!(parse_image_refs("<html><body><p>No wallpapers</p></body></html>").is_empty());
    }

    #[test]
    fn test_image_id_is_third_segment() {
        assert_eq!(ImageRef::new("/wallpapers/30101/misty-lake/").image_id().unwrap(), "30101");
        assert_eq!(
            ImageRef::new("http://www.socwall.com/wallpapers/30103/night-city/").image_id().unwrap(),
            "30103"
        );
        assert_eq!(
            ImageRef::new("/wallpapers/30101/").file_name().unwrap(),
            "socwall-30101.jpg"
        );
    }

    #[test]
    fn test_image_id_rejects_short_refs() {
        for bad in ["", "/", "/wallpapers", "/wallpapers/", "/wallpapers//x/"] {
            match ImageRef::new(bad).image_id() {
                Err(Error::MalformedRef(value)) => assert_eq!(value, bad),
                other => panic!("expected MalformedRef for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_parse_download_link() {
        assert_eq!(
            parse_download_link(&detail_page("/images/wallpapers/30101-1920x1080.jpg")).as_deref(),
            Some("/images/wallpapers/30101-1920x1080.jpg")
        );
        assert_eq!(parse_download_link("<html><body><h1>404</h1></body></html>"), None);
    }

    #[test]
    fn test_absolute_url() {
        let base = "http://www.socwall.com";
        assert_eq!(absolute_url(base, "/images/a.jpg"), "http://www.socwall.com/images/a.jpg");
        assert_eq!(absolute_url(base, "images/a.jpg"), "http://www.socwall.com/images/a.jpg");
        assert_eq!(absolute_url(base, "https://cdn.test/a.jpg"), "https://cdn.test/a.jpg");
        assert_eq!(absolute_url(base, "//cdn.test/a.jpg"), "http://cdn.test/a.jpg");
    }

    #[test]
    fn test_every_listed_ref_resolves_to_a_well_formed_url() {
        let base = "http://www.socwall.com";
        for image in parse_image_refs(LISTING) {
            let id = image.image_id().unwrap();
            let page = detail_page(&format!("/images/wallpapers/{id}-1920x1080.jpg"));
            let url = absolute_url(base, &parse_download_link(&page).unwrap());
            assert!(url.starts_with("http://www.socwall.com/images/wallpapers/"), "{url}");
            assert!(url.ends_with(&format!("{id}-1920x1080.jpg")), "{url}");
            assert!(!url.contains("//images"), "{url}");
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("301 01/..x"), "301_01___x");
        assert_eq!(sanitize_filename(&"a".repeat(150)).len(), 100);
    }

    #[test]
    fn test_list_images_sends_user_agent_to_listing_url() {
        let temp_dir = TempDir::new().unwrap();
        let (base_url, server) = serve_once("200 OK", LISTING.as_bytes().to_vec());
        let client = client_for(&base_url, &temp_dir);

        let refs = client.list_images(3).unwrap();
        assert_eq!(refs.len(), 3);

        let request = server.join().unwrap().to_lowercase();
        assert!(request.starts_with("get /wallpapers/page:3/ "), "{request}");
        assert!(request.contains("user-agent: mozilla/5.0"), "{request}");
    }

    #[test]
    fn test_list_images_non_2xx_is_fetch_error() {
        let temp_dir = TempDir::new().unwrap();
        let (base_url, server) = serve_once("404 Not Found", b"gone".to_vec());
        let client = client_for(&base_url, &temp_dir);

        let result = client.list_images(9999);
        assert!(matches!(result, Err(Error::Fetch { .. })), "{result:?}");
        server.join().unwrap();
    }

    #[test]
    fn test_resolve_download_url_without_anchor() {
        let temp_dir = TempDir::new().unwrap();
        let (base_url, server) = serve_once("200 OK", b"<html><body>moved</body></html>".to_vec());
        let client = client_for(&base_url, &temp_dir);

        let result = client.resolve_download_url(&ImageRef::new("/wallpapers/42/x/"));
        assert!(matches!(result, Err(Error::MissingDownloadLink(ref id)) if id == "42"), "{result:?}");
        let request = server.join().unwrap();
        assert!(request.starts_with("GET /desktop-wallpaper/42/wallpaper/ "), "{request}");
    }

    #[test]
    fn test_resolve_download_url_makes_link_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let (base_url, server) = serve_once("200 OK", detail_page("/images/42.jpg").into_bytes());
        let client = client_for(&base_url, &temp_dir);

        let url = client.resolve_download_url(&ImageRef::new("/wallpapers/42/x/")).unwrap();
        assert_eq!(url, format!("{base_url}/images/42.jpg"));
        server.join().unwrap();
    }

    #[test]
    fn test_malformed_ref_fails_before_any_request() {
        let temp_dir = TempDir::new().unwrap();
        let client = client_for("http://127.0.0.1:9", &temp_dir);
        let result = client.resolve_download_url(&ImageRef::new("nonsense"));
        assert!(matches!(result, Err(Error::MalformedRef(_))));
    }
}
