// src/lib.rs
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod error;
pub mod util;

pub mod symbol;
pub mod scanner;
pub mod cache;
pub mod walker;

pub mod rules;
pub mod builder;
pub mod codegen;
pub mod staging;
pub mod classmap;

pub mod clean;
pub mod extract;
pub mod vendor_check;
pub mod verify;

pub mod protocol;
pub mod host;

pub mod commands;
