pub mod db;
pub mod runner;
pub mod storage;
