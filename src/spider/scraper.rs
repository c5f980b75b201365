use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::tabelog::TabelogRestaurant;
use crate::spider::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::spider::html::{self, parse_f64, parse_i64};
use crate::spider::retry::{retry_with_backoff, RetryConfig};
use crate::spider::ScrapeError;

pub const GENRE_TITLE: &str = "ジャンル：";

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

#[derive(Clone, Debug)]
pub struct ScraperConfig {
    pub base_url: String,
    pub max_concurrent: usize,
    pub max_links: usize,
    pub timeout: Duration,
    pub request_delay: Duration,
    /// Upper bound of the random extra delay added to `request_delay`.
    pub request_jitter: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tabelog.com".to_string(),
            max_concurrent: 4,
            max_links: 4,
            timeout: Duration::from_secs(10),
            request_delay: Duration::from_millis(500),
            request_jitter: Duration::from_millis(200),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// The job processor's view of a scraper.
#[async_trait]
pub trait RestaurantScraper: Send + Sync {
    async fn scrape_restaurants(
        &self,
        area: &str,
        place_name: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<Vec<TabelogRestaurant>, ScrapeError>;
}

pub struct TabelogScraper {
    client: reqwest::Client,
    config: ScraperConfig,
    breaker: CircuitBreaker,
    next_agent: AtomicUsize,
}

impl TabelogScraper {
    pub fn new(config: ScraperConfig) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ScrapeError::Http(e.to_string()))?;
        let breaker = CircuitBreaker::new("tabelog-scraper", config.circuit_breaker);
        Ok(Self {
            client,
            config: ScraperConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            breaker,
            next_agent: AtomicUsize::new(0),
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The prefecture segment is lowercased; area codes such as `A1303` keep their case.
    pub fn build_search_url(&self, area: &str, place_name: &str) -> String {
        let name = urlencoding::encode(place_name);
        let area = area.trim();
        let area = match area.split_once('/') {
            Some((prefecture, code)) => format!("{}/{}", prefecture.to_lowercase(), code),
            None => area.to_lowercase(),
        };
        format!(
            "{}/{}/rstLst/?vs=1&sk={}&sw={}",
            self.config.base_url, area, name, name
        )
    }

    fn absolute(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else if link.starts_with('/') {
            format!("{}{}", self.config.base_url, link)
        } else {
            format!("{}/{}", self.config.base_url, link)
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        let jitter_ms = self.config.request_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::random::<u64>() % jitter_ms
        };
        tokio::time::sleep(self.config.request_delay + Duration::from_millis(jitter)).await;

        let agent = USER_AGENTS[self.next_agent.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len()];
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, agent)
            .send()
            .await
            .map_err(|e| ScrapeError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| ScrapeError::Http(e.to_string()))
    }

    pub async fn scrape_links(
        &self,
        area: &str,
        place_name: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Vec<String>, ScrapeError> {
        let url = self.build_search_url(area, place_name);
        info!(%url, area, place_name, "Visiting Tabelog search URL");

        let breaker = &self.breaker;
        let target = url.as_str();
        let page = retry_with_backoff(&self.config.retry, cancel, move || {
            breaker.execute(move || self.fetch(target))
        })
        .await?;

        Ok(parse_links(&page)
            .into_iter()
            .map(|link| self.absolute(&link))
            .fold(Vec::new(), |mut unique, link| {
                if !unique.contains(&link) {
                    unique.push(link);
                }
                unique
            })
            .into_iter()
            .take(self.config.max_links)
            .collect())
    }

    pub async fn scrape_details(&self, link: &str) -> Result<TabelogRestaurant, ScrapeError> {
        let page = self.fetch(link).await?;
        let mut restaurant = parse_restaurant_page(link, &page);

        let photo_url = format!("{}/dtlphotolst/", link.trim_end_matches('/'));
        match self.fetch(&photo_url).await {
            Ok(photos) => restaurant.photos = parse_photos(&photos),
            Err(e) => debug!(url = %photo_url, "Skipping photos: {}", e),
        }
        Ok(restaurant)
    }
}

#[async_trait]
impl RestaurantScraper for TabelogScraper {
    async fn scrape_restaurants(
        &self,
        area: &str,
        place_name: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Vec<TabelogRestaurant>, ScrapeError> {
        let started = Instant::now();
        let links = match self.scrape_links(area, place_name, &mut cancel).await {
            Ok(links) => links,
            Err(e) => {
                metrics::counter!("spider_scrape_errors_total", "type" => e.metric_label()).increment(1);
                return Err(e);
            }
        };
        if links.is_empty() {
            warn!(area, place_name, "No restaurant links found");
            metrics::counter!("spider_scrape_errors_total", "type" => "no_results").increment(1);
            return Ok(Vec::new());
        }
        info!(count = links.len(), "Found restaurant links");

        let outcomes: Vec<Result<TabelogRestaurant, ScrapeError>> = stream::iter(links.into_iter())
            .map(|link| async move {
                let outcome = self.scrape_details(&link).await;
                if let Err(e) = &outcome {
                    warn!(url = %link, "Failed to scrape restaurant details: {}", e);
                    metrics::counter!("spider_scrape_errors_total", "type" => "details_failed")
                        .increment(1);
                }
                outcome
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        let mut restaurants = Vec::new();
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(restaurant) => restaurants.push(restaurant),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if restaurants.is_empty() {
            if let Some(e) = first_error {
                metrics::counter!("spider_scrape_errors_total", "type" => "all_failed").increment(1);
                return Err(ScrapeError::AllFailed(e.to_string()));
            }
        }

        metrics::counter!("spider_restaurants_scraped_total").increment(restaurants.len() as u64);
        info!(
            total = restaurants.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scraping completed"
        );
        Ok(restaurants)
    }
}

pub fn parse_links(page: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    html::select(page, "a.list-rst__rst-name-target")
        .iter()
        .filter_map(|anchor| anchor.attr("href"))
        .filter(|href| !href.trim().is_empty())
        .filter(|href| seen.insert(href.clone()))
        .collect()
}

pub fn parse_restaurant_page(link: &str, page: &str) -> TabelogRestaurant {
    let types = html::select(page, ".rdheader-subinfo__item")
        .into_iter()
        .filter(|item| item.select_text(".rdheader-subinfo__item-title") == GENRE_TITLE)
        .flat_map(|item| {
            item.select(".linktree__parent-target-text")
                .iter()
                .map(|genre| genre.text())
                .collect::<Vec<_>>()
        })
        .filter(|genre| !genre.is_empty())
        .collect();

    TabelogRestaurant {
        link: link.to_string(),
        name: html::select_text(page, "h2.display-name"),
        rating: parse_f64(&html::select_text(page, ".rdheader-rating__score b.c-rating__val")),
        rating_count: parse_i64(&html::select_text(page, ".rdheader-rating__review-target .num")),
        bookmarks: parse_i64(&html::select_text(page, ".rdheader-rating__hozon-target .num")),
        phone: html::select_text(page, ".rstinfo-table__tel-num"),
        types,
        photos: Vec::new(),
    }
}

pub fn parse_photos(page: &str) -> Vec<String> {
    html::select(page, ".rstdtl-photo-list__img")
        .iter()
        .filter_map(|img| img.attr("src"))
        .filter(|src| !src.is_empty())
        .collect()
}
