use crate::error::AppError;

pub async fn page_not_found_handler() -> AppError {
    AppError::not_found("Oops looks like you landed at the wrong endpoint")
}
