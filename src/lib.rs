//! # Estate Feed
//!
//! Turns a channel of free-text real-estate announcements into a structured,
//! reconciled listings catalog.
//!
//! Posts are mirrored into SQLite (one listing per post or album), photos
//! go to an object store, and a rule-based extractor fills typed fields
//! (price, area, rooms, floor, condition, address) from the prose. Deleted
//! posts are reconciled away behind a mass-deletion guard.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │   Channel   │──▶│ Sync engine │──▶│  SQLite  │
//! │ HTTP / mem  │   │  (ingest)   │   │ catalog  │
//! └─────────────┘   └──────┬──────┘   └────┬─────┘
//!                          ▼               │
//!                   ┌─────────────┐        ├──────────────┐
//!                   │ Object store│        ▼              ▼
//!                   │   fs / S3   │   ┌──────────┐  ┌──────────┐
//!                   └─────────────┘   │ Extractor│  │   HTTP   │
//!                                     └──────────┘  │ control  │
//!                                                   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! estate init                       # create database
//! estate sync backfill --extract    # mirror the last 90 days
//! estate sync incremental           # pick up new posts
//! estate sync check-deleted         # drop listings whose posts are gone
//! estate extract --preview "2+1, 85 м², $120,000"
//! estate serve                      # start the control surface
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`channel`] | Channel client trait and in-memory channel |
//! | [`channel_http`] | HTTP gateway channel client |
//! | [`catalog`] | Catalog reads and natural-key upserts |
//! | [`storage`] | Object store trait and filesystem backend |
//! | [`storage_s3`] | S3-compatible backend (SigV4) |
//! | [`media`] | Attachment download, storage and cleanup |
//! | [`ingest`] | Sync engine: backfill, incremental, deleted check |
//! | [`extract`] | Heuristic field extraction |
//! | [`listings`] | Operator get / update / delete |
//! | [`server`] | HTTP control surface |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod channel;
pub mod channel_http;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod listings;
pub mod media;
pub mod migrate;
pub mod models;
pub mod server;
pub mod sources;
pub mod storage;
pub mod storage_s3;
