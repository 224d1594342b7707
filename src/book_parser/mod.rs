pub mod generator;
pub mod html_utils;
