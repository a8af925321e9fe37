//! # homehub-domain
//!
//! Pure domain model for the homehub automation core.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, levels
//! - Define **Devices** (hubs and the children that talk through them)
//! - Define **Zones** and **Buttons** (the features a device exposes)
//! - Define **Scenes** (ordered bundles of commands)
//! - Define **Commands** (the closed set of logical intents)
//! - Define **Recipes** definitions and **CookBooks** (trigger → action templates)
//! - Define **Events** (outcome, trigger and connection records)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or IO crates.
//! Runtime behaviour (pools, dispatch, triggers) lives in `homehub-app`.

pub mod error;
pub mod id;
pub mod level;

pub mod button;
pub mod command;
pub mod cookbook;
pub mod device;
pub mod event;
pub mod recipe;
pub mod scene;
pub mod zone;
