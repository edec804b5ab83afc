pub mod common;

mod article_tests;
