mod title_scraper;

pub use title_scraper::{extract_title, TitleScraper};
