//! quicknews: feed ingestion with AI digests, speech audio and a daily
//! podcast, run as a daemon or driven from the command line.

pub mod ai;
pub mod app;
pub mod audio;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod feed;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod publish;
pub mod services;
pub mod storage;
pub mod tui;
