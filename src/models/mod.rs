pub mod favorite;
pub mod place;
pub mod restaurant;
pub mod scraping_job;
pub mod session;
pub mod tabelog;
pub mod token;
pub mod user;
