// Component A: link quality ingestion
// CQI sources (simulated radio or gNB scrape) and the rolling metric window they feed.

pub mod sensor;
pub mod window;
