//! # Revision Announcer
//!
//! Announces, for each calendar epoch (monthly, weekly, daily, eight-,
//! four- and two-hourly, hourly), the latest merged-PR revision of a git
//! repository that precedes the start of the current epoch.
//!
//! The selection engine lives in the `announcer-core` crate; this crate
//! supplies the `git` adapter, the long-lived service, the HTTP API and the
//! `announcer` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  git clone   │──▶│  Announcer   │──▶│   Selector   │
//! │ (shallow)    │   │ refresh loop │   │ (core crate) │
//! └──────────────┘   └──────┬───────┘   └──────────────┘
//!                           │
//!                 ┌─────────┴─────────┐
//!                 ▼                   ▼
//!            ┌──────────┐       ┌──────────┐
//!            │   CLI    │       │   HTTP   │
//!            └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`git`] | Repository access through the `git` binary |
//! | [`announcer`] | Shared repository handle and refresh loop |
//! | [`api`] | JSON shapes and query parsing |
//! | [`server`] | HTTP server |
//! | [`github`] | GitHub REST client |
//! | [`telemetry`] | Logging setup |

pub mod announcer;
pub mod api;
pub mod config;
pub mod git;
pub mod github;
pub mod server;
pub mod telemetry;
