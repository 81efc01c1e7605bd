//! Integration tests: worker → gateway → store → analytics.

mod mock_fetcher;
mod pipeline;
