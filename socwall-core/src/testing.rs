//! Test doubles shared by the module tests.

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fetcher::ImageFetcher;
use crate::gallery::{Gallery, ImageRef};

/// Answers exactly one HTTP request on 127.0.0.1 with the given status line
/// and body. The join handle yields the raw request head.
pub(crate) fn serve_once(status_line: &'static str, body: Vec<u8>) -> (String, JoinHandle<String>) {
    let mut response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend(body);
    serve_raw(response)
}

/// Like `serve_once`, but writes `response` verbatim and then closes.
pub(crate) fn serve_raw(response: Vec<u8>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                break;
            }
            request.push_str(&line);
        }

        let _ = stream.write_all(&response);
        let _ = stream.flush();
        request
    });

    (format!("http://{addr}"), handle)
}

/// Deterministic gallery: every page lists `images_per_page` images with ids
/// `page * 1000 + index`, and every image resolves and downloads.
pub(crate) struct MockGallery {
    images_per_page: usize,
    delay: Duration,
    failing_pages: HashSet<u32>,
    failing_images: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetches: AtomicUsize,
    listed_pages: Mutex<Vec<u32>>,
}

impl MockGallery {
    pub(crate) fn new(images_per_page: usize) -> Self {
        Self {
            images_per_page,
            delay: Duration::ZERO,
            failing_pages: HashSet::new(),
            failing_images: HashSet::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            listed_pages: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub(crate) fn failing_image(mut self, image_id: &str) -> Self {
        self.failing_images.insert(image_id.to_string());
        self
    }

    pub(crate) fn image_ref(page: u32, index: usize) -> ImageRef {
        ImageRef::new(format!("/wallpapers/{}/title/", page as usize * 1000 + index))
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn listed_pages(&self) -> Vec<u32> {
        self.listed_pages.lock().unwrap().clone()
    }

    fn request(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Gallery for MockGallery {
    fn list_images(&self, page_number: u32) -> Result<Vec<ImageRef>> {
        self.listed_pages.lock().unwrap().push(page_number);
        if self.failing_pages.contains(&page_number) {
            return Err(Error::fetch(format!("mock://page/{page_number}"), "HTTP 503 Service Unavailable"));
        }
        Ok((0..self.images_per_page)
            .map(|index| Self::image_ref(page_number, index))
            .collect())
    }

    fn resolve_download_url(&self, image: &ImageRef) -> Result<String> {
        let _request = self.request();
        let image_id = image.image_id()?;
        if self.failing_images.contains(image_id) {
            return Err(Error::MissingDownloadLink(image_id.to_string()));
        }
        Ok(format!("http://mock.test/images/{image_id}.jpg"))
    }
}

impl ImageFetcher for MockGallery {
    fn fetch(&self, _url: &str, destination: &Path) -> Result<u64> {
        let _request = self.request();
        fs::write(destination, b"jpeg")?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(4)
    }
}
