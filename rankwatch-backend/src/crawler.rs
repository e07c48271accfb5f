//! Leaderboard crawling.
//!
//! [`Crawler`] is the boundary the observer polls; [`HttpCrawler`] scrapes the
//! ranked stats table and the "online now" table off the site.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use rankwatch_db::Player;
use regex::Regex;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.csdm.pro";

/// Rows per page of the ranked listing.
pub const PAGE_SIZE: usize = 50;

const USER_AGENT: &str = concat!("rankwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("unparsable page: {0}")]
    Parse(&'static str),
}

#[async_trait]
pub trait Crawler: Send + Sync {
    /// One page (1-based) of the global ranked leaderboard.
    async fn stats(&self, page: u32) -> Result<Vec<Player>, CrawlError>;

    /// The players currently online.
    async fn online(&self) -> Result<Vec<Player>, CrawlError>;
}

pub struct HttpCrawler {
    client: Client,
    base_url: String,
}

impl HttpCrawler {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<String, CrawlError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Status(status));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    async fn stats(&self, page: u32) -> Result<Vec<Player>, CrawlError> {
        let url = format!("{}/stats?p={}", self.base_url, page);
        let body = self.fetch(&url).await?;
        let players = parse_stat_table(&body)?;
        debug!(page, count = players.len(), "crawled stats page");
        Ok(players)
    }

    async fn online(&self) -> Result<Vec<Player>, CrawlError> {
        let body = self.fetch(&self.base_url).await?;
        let players = parse_stat_table(&body)?;
        debug!(count = players.len(), "crawled online players");
        Ok(players)
    }
}

static TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<table[^>]*class="[^"]*\bstat\b[^"]*"[^>]*>(.*?)</table>"#)
        .expect("valid table regex")
});
static TBODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tbody[^>]*>(.*?)</tbody>").expect("valid tbody regex"));
static ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("valid row regex"));
static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").expect("valid cell regex"));
static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img[^>]*\bsrc="([^"]*)""#).expect("valid img regex")
});
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static LEADING_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]+").expect("valid digits regex"));

// Column layout of the site's `.stat` table
const COL_RANK: usize = 0;
const COL_NAME: usize = 1;
const COL_SCORE: usize = 2;
const COL_KILLS: usize = 3;
const COL_DEATHS: usize = 4;
const COL_ACCURACY: usize = 6;

/// Parse every row of the first `.stat` table. Malformed rows are skipped.
///
/// A page without the table at all (maintenance, error pages) is an error,
/// while an empty table is a valid empty page.
pub fn parse_stat_table(html: &str) -> Result<Vec<Player>, CrawlError> {
    let Some(table) = TABLE.captures(html).and_then(|c| c.get(1)) else {
        return Err(CrawlError::Parse("no stat table"));
    };
    let body = TBODY
        .captures(table.as_str())
        .and_then(|c| c.get(1))
        .map_or(table.as_str(), |m| m.as_str());

    let mut players = Vec::with_capacity(PAGE_SIZE);
    for (index, row) in ROW.captures_iter(body).enumerate() {
        let cells: Vec<&str> = CELL
            .captures_iter(&row[1])
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if cells.is_empty() {
            continue;
        }
        match parse_row(&cells) {
            Some(player) => players.push(player),
            None => warn!(row = index, "skipping malformed stat row"),
        }
    }
    Ok(players)
}

fn parse_row(cells: &[&str]) -> Option<Player> {
    let name_cell = cells.get(COL_NAME)?;
    let name = text(name_cell);
    if name.is_empty() {
        return None;
    }
    let country = IMG_SRC
        .captures(name_cell)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    Some(Player {
        name,
        country,
        // Unranked players show a placeholder instead of a number
        rank: cells.get(COL_RANK).and_then(|c| text(c).parse().ok()),
        score: number(cells.get(COL_SCORE)?)?,
        kills: number(cells.get(COL_KILLS)?)?,
        deaths: number(cells.get(COL_DEATHS)?)?,
        accuracy: leading_number(cells.get(COL_ACCURACY)?)?,
    })
}

fn text(cell: &str) -> String {
    let stripped = TAG.replace_all(cell, "");
    decode_entities(stripped.trim())
}

fn number(cell: &str) -> Option<i64> {
    text(cell).replace([',', ' '], "").parse().ok()
}

/// Leading integer of a cell such as "61%" or "61.5 %".
fn leading_number(cell: &str) -> Option<i64> {
    let text = text(cell);
    LEADING_DIGITS.find(&text)?.as_str().parse().ok()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
    <html><body>
    <table class="table stat">
      <thead><tr><th>#</th><th>Player</th><th>Score</th><th>Kills</th><th>Deaths</th><th>HS</th><th>Acc</th></tr></thead>
      <tbody>
        <tr>
          <td>1</td>
          <td><img src="/img/flags/ir.png" alt=""> thekhanj</td>
          <td>12,345</td><td>5000</td><td>2500</td><td>900</td><td>61%</td>
        </tr>
        <tr>
          <td>2</td>
          <td><img src="/img/flags/de.png"> Tom &amp; Jerry</td>
          <td>9000</td><td>4000</td><td>3000</td><td>700</td><td>48 %</td>
        </tr>
        <tr>
          <td>-</td>
          <td><img src="/img/flags/us.png"> newbie</td>
          <td>10</td><td>3</td><td>9</td><td>0</td><td>12%</td>
        </tr>
        <tr>
          <td>4</td>
          <td><img src="/img/flags/fr.png"> broken</td>
          <td>n/a</td><td>1</td><td>1</td><td>0</td><td>1%</td>
        </tr>
      </tbody>
    </table>
    </body></html>
    "#;

    #[test]
    fn test_parse_stat_table() {
        let players = parse_stat_table(PAGE).unwrap();
        assert_eq!(players.len(), 3);

        assert_eq!(
            players[0],
            Player {
                name: "thekhanj".to_string(),
                country: "/img/flags/ir.png".to_string(),
                rank: Some(1),
                score: 12345,
                kills: 5000,
                deaths: 2500,
                accuracy: 61,
            }
        );
        assert_eq!(players[1].name, "Tom & Jerry");
        assert_eq!(players[1].accuracy, 48);
    }

    #[test]
    fn test_unranked_row_has_no_rank() {
        let players = parse_stat_table(PAGE).unwrap();
        assert_eq!(players[2].name, "newbie");
        assert_eq!(players[2].rank, None);
    }

    #[test]
    fn test_page_without_table() {
        assert!(matches!(
            parse_stat_table("<html><body>maintenance</body></html>"),
            Err(CrawlError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_table_is_empty_page() {
        let html = r#"<table class="stat"><thead><tr><th>#</th></tr></thead><tbody></tbody></table>"#;
        assert!(parse_stat_table(html).unwrap().is_empty());
    }

    #[test]
    fn test_http_crawler_trims_base_url() {
        let crawler = HttpCrawler::new("https://example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(crawler.base_url, "https://example.com");
    }
}
