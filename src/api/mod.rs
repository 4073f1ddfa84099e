//! HTTP surface of the clinic store

pub mod rest;
