use std::collections::HashMap;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bb8_postgres::bb8::{Pool, PooledConnection};
use bb8_postgres::tokio_postgres::error::SqlState;
use bb8_postgres::tokio_postgres::{NoTls, Row};
use bb8_postgres::PostgresConnectionManager;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::favorite::Favorite;
use crate::models::restaurant::{Location, Restaurant, RestaurantError, RestaurantSource};
use crate::models::token::RefreshToken;
use crate::models::user::{AuthError, Role, User};
use crate::repositories::{
    bounding_box, FavoriteRepository, RestaurantRepository, TokenRepository, UserRepository,
};

pub const RETRY_LIMIT: usize = 5;

pub type PostgresPool = Pool<PostgresConnectionManager<NoTls>>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS restaurants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    name_ja TEXT NOT NULL DEFAULT '',
    area TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL,
    external_id TEXT NOT NULL,
    address TEXT NOT NULL DEFAULT '',
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    rating DOUBLE PRECISION NOT NULL DEFAULT 0,
    price_range TEXT NOT NULL DEFAULT '',
    cuisine_type TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    website TEXT NOT NULL DEFAULT '',
    opening_hours JSONB NOT NULL DEFAULT '{}',
    metadata JSONB NOT NULL DEFAULT '{}',
    view_count BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    deleted_at TIMESTAMPTZ
);
CREATE UNIQUE INDEX IF NOT EXISTS restaurants_source_external_id
    ON restaurants (source, external_id) WHERE deleted_at IS NULL;
CREATE TABLE IF NOT EXISTS favorites (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    restaurant_id TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    tags TEXT[] NOT NULL DEFAULT '{}',
    visit_count INTEGER NOT NULL DEFAULT 0,
    last_visited_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    deleted_at TIMESTAMPTZ
);
CREATE UNIQUE INDEX IF NOT EXISTS favorites_user_restaurant
    ON favorites (user_id, restaurant_id) WHERE deleted_at IS NULL;
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    username TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    email_verified BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS refresh_tokens (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    revoked_at TIMESTAMPTZ
);
";

const RESTAURANT_COLUMNS: &str = "id, name, name_ja, area, source, external_id, address, \
    latitude, longitude, rating, price_range, cuisine_type, phone, website, opening_hours, \
    metadata, view_count, created_at, updated_at, deleted_at";

const FAVORITE_COLUMNS: &str = "id, user_id, restaurant_id, notes, tags, visit_count, \
    last_visited_at, created_at, updated_at, deleted_at";

#[derive(Clone)]
pub struct PostgresConnectionRepo {
    postgres_connection: PostgresPool,
}

impl PostgresConnectionRepo {
    pub fn new(postgres_connection: PostgresPool) -> Self {
        Self {
            postgres_connection,
        }
    }

    pub async fn connect(connection_string: &str, pool_size: u32) -> anyhow::Result<Self> {
        let manager = PostgresConnectionManager::new_from_stringlike(connection_string, NoTls)
            .context("Invalid postgres connection string")?;
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .await
            .context("Failed to build postgres pool")?;
        Ok(Self::new(pool))
    }

    async fn get_postgres_connection(
        &self,
    ) -> anyhow::Result<PooledConnection<'_, PostgresConnectionManager<NoTls>>> {
        for _ in 0..RETRY_LIMIT {
            match self.postgres_connection.get().await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!("Failed to retrieve postgres connection due to: {}, retrying in 3s", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(3)).await;
                    continue;
                }
            }
        }

        Err(anyhow!("Failed to retrieve a valid connection from postgres pool, BAILING"))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.get_postgres_connection().await?;
        conn.batch_execute(SCHEMA)
            .await
            .context("Failed to apply postgres schema")?;
        info!("Postgres schema is up to date");
        Ok(())
    }

    async fn query_restaurants(
        &self,
        clause: &str,
        params: &[&(dyn bb8_postgres::tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let stmt = format!(
            "SELECT {} FROM restaurants WHERE deleted_at IS NULL {}",
            RESTAURANT_COLUMNS, clause
        );
        let rows = conn.query(&stmt, params).await.map_err(restaurant_err)?;
        rows.iter()
            .map(parse_row_into_restaurant)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(restaurant_err)
    }

    async fn query_favorites(
        &self,
        clause: &str,
        params: &[&(dyn bb8_postgres::tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<Favorite>, RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let stmt = format!(
            "SELECT {} FROM favorites WHERE deleted_at IS NULL {}",
            FAVORITE_COLUMNS, clause
        );
        let rows = conn.query(&stmt, params).await.map_err(restaurant_err)?;
        rows.iter()
            .map(parse_row_into_favorite)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(restaurant_err)
    }
}

fn restaurant_err(e: impl std::fmt::Display) -> RestaurantError {
    RestaurantError::Repository(e.to_string())
}

fn auth_err(e: impl std::fmt::Display) -> AuthError {
    AuthError::Repository(e.to_string())
}

fn is_unique_violation(e: &bb8_postgres::tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

#[async_trait]
impl RestaurantRepository for PostgresConnectionRepo {
    async fn create(&self, restaurant: &Restaurant) -> Result<(), RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let id = restaurant.id.to_string();
        let source = restaurant.source.as_str();
        let latitude = restaurant.location.map(|l| l.lat);
        let longitude = restaurant.location.map(|l| l.lng);
        let opening_hours = serde_json::to_value(&restaurant.opening_hours).map_err(restaurant_err)?;
        let metadata = Value::Object(restaurant.metadata.clone());

        let res = conn
            .execute(
                &format!(
                    "INSERT INTO restaurants ({}) VALUES \
                     ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)",
                    RESTAURANT_COLUMNS
                ),
                &[
                    &id,
                    &restaurant.name,
                    &restaurant.name_ja,
                    &restaurant.area,
                    &source,
                    &restaurant.external_id,
                    &restaurant.address,
                    &latitude,
                    &longitude,
                    &restaurant.rating,
                    &restaurant.price_range,
                    &restaurant.cuisine_type,
                    &restaurant.phone,
                    &restaurant.website,
                    &opening_hours,
                    &metadata,
                    &restaurant.view_count,
                    &restaurant.created_at,
                    &restaurant.updated_at,
                    &restaurant.deleted_at,
                ],
            )
            .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RestaurantError::RestaurantAlreadyExists),
            Err(e) => {
                warn!("Failed to insert restaurant {} due to: {}", restaurant.id, e);
                Err(restaurant_err(e))
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Restaurant, RestaurantError> {
        let id = id.to_string();
        self.query_restaurants("AND id = $1 LIMIT 1", &[&id])
            .await?
            .into_iter()
            .next()
            .ok_or(RestaurantError::RestaurantNotFound)
    }

    async fn find_by_external_id(
        &self,
        source: RestaurantSource,
        external_id: &str,
    ) -> Result<Restaurant, RestaurantError> {
        let source = source.as_str();
        self.query_restaurants(
            "AND source = $1 AND external_id = $2 LIMIT 1",
            &[&source, &external_id],
        )
        .await?
        .into_iter()
        .next()
        .ok_or(RestaurantError::RestaurantNotFound)
    }

    async fn update(&self, restaurant: &Restaurant) -> Result<(), RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let id = restaurant.id.to_string();
        let latitude = restaurant.location.map(|l| l.lat);
        let longitude = restaurant.location.map(|l| l.lng);
        let opening_hours = serde_json::to_value(&restaurant.opening_hours).map_err(restaurant_err)?;
        let metadata = Value::Object(restaurant.metadata.clone());

        let updated = conn
            .execute(
                "UPDATE restaurants SET name = $2, name_ja = $3, area = $4, address = $5, \
                 latitude = $6, longitude = $7, rating = $8, price_range = $9, cuisine_type = $10, \
                 phone = $11, website = $12, opening_hours = $13, metadata = $14, view_count = $15, \
                 updated_at = $16, deleted_at = $17 \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[
                    &id,
                    &restaurant.name,
                    &restaurant.name_ja,
                    &restaurant.area,
                    &restaurant.address,
                    &latitude,
                    &longitude,
                    &restaurant.rating,
                    &restaurant.price_range,
                    &restaurant.cuisine_type,
                    &restaurant.phone,
                    &restaurant.website,
                    &opening_hours,
                    &metadata,
                    &restaurant.view_count,
                    &restaurant.updated_at,
                    &restaurant.deleted_at,
                ],
            )
            .await
            .map_err(restaurant_err)?;

        if updated == 0 {
            return Err(RestaurantError::RestaurantNotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let id = id.to_string();
        let now = OffsetDateTime::now_utc();
        let deleted = conn
            .execute(
                "UPDATE restaurants SET deleted_at = $2, updated_at = $2 \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id, &now],
            )
            .await
            .map_err(restaurant_err)?;

        if deleted == 0 {
            return Err(RestaurantError::RestaurantNotFound);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        let pattern = format!("%{}%", query);
        let (limit, offset) = (sql_bound(limit), sql_bound(offset));
        self.query_restaurants(
            "AND (name ILIKE $1 OR name_ja ILIKE $1 OR address ILIKE $1 OR cuisine_type ILIKE $1) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            &[&pattern, &limit, &offset],
        )
        .await
    }

    async fn find_by_location(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        let (lat_delta, lng_delta) = bounding_box(radius_km);
        let (min_lat, max_lat) = (lat - lat_delta, lat + lat_delta);
        let (min_lng, max_lng) = (lng - lng_delta, lng + lng_delta);
        let limit = sql_bound(limit);
        self.query_restaurants(
            "AND latitude BETWEEN $1 AND $2 AND longitude BETWEEN $3 AND $4 \
             ORDER BY created_at DESC LIMIT $5",
            &[&min_lat, &max_lat, &min_lng, &max_lng, &limit],
        )
        .await
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Restaurant>, RestaurantError> {
        let (limit, offset) = (sql_bound(limit), sql_bound(offset));
        self.query_restaurants(
            "ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            &[&limit, &offset],
        )
        .await
    }

    async fn count(&self) -> Result<i64, RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM restaurants WHERE deleted_at IS NULL", &[])
            .await
            .map_err(restaurant_err)?;
        Ok(row.get::<usize, i64>(0))
    }

    async fn find_by_cuisine_type(
        &self,
        cuisine_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        let (limit, offset) = (sql_bound(limit), sql_bound(offset));
        self.query_restaurants(
            "AND cuisine_type ILIKE $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            &[&cuisine_type, &limit, &offset],
        )
        .await
    }

    async fn find_by_source(
        &self,
        source: RestaurantSource,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        let source = source.as_str();
        let (limit, offset) = (sql_bound(limit), sql_bound(offset));
        self.query_restaurants(
            "AND source = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            &[&source, &limit, &offset],
        )
        .await
    }
}

#[async_trait]
impl FavoriteRepository for PostgresConnectionRepo {
    async fn create(&self, favorite: &Favorite) -> Result<(), RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let id = favorite.id.to_string();
        let user_id = favorite.user_id.to_string();
        let restaurant_id = favorite.restaurant_id.to_string();

        let res = conn
            .execute(
                &format!(
                    "INSERT INTO favorites ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                    FAVORITE_COLUMNS
                ),
                &[
                    &id,
                    &user_id,
                    &restaurant_id,
                    &favorite.notes,
                    &favorite.tags,
                    &favorite.visit_count,
                    &favorite.last_visited_at,
                    &favorite.created_at,
                    &favorite.updated_at,
                    &favorite.deleted_at,
                ],
            )
            .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RestaurantError::FavoriteAlreadyExists),
            Err(e) => {
                warn!("Failed to insert favorite for user: {}, due to: {}", user_id, e);
                Err(restaurant_err(e))
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Favorite, RestaurantError> {
        let id = id.to_string();
        self.query_favorites("AND id = $1 LIMIT 1", &[&id])
            .await?
            .into_iter()
            .next()
            .ok_or(RestaurantError::FavoriteNotFound)
    }

    async fn find_by_user_and_restaurant(
        &self,
        user_id: Uuid,
        restaurant_id: Uuid,
    ) -> Result<Favorite, RestaurantError> {
        let (user_id, restaurant_id) = (user_id.to_string(), restaurant_id.to_string());
        self.query_favorites(
            "AND user_id = $1 AND restaurant_id = $2 LIMIT 1",
            &[&user_id, &restaurant_id],
        )
        .await?
        .into_iter()
        .next()
        .ok_or(RestaurantError::FavoriteNotFound)
    }

    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<Favorite>, RestaurantError> {
        let user_id = user_id.to_string();
        self.query_favorites("AND user_id = $1 ORDER BY created_at DESC", &[&user_id])
            .await
    }

    async fn find_by_restaurant_id(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<Favorite>, RestaurantError> {
        let restaurant_id = restaurant_id.to_string();
        self.query_favorites(
            "AND restaurant_id = $1 ORDER BY created_at DESC",
            &[&restaurant_id],
        )
        .await
    }

    async fn update(&self, favorite: &Favorite) -> Result<(), RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let id = favorite.id.to_string();
        let updated = conn
            .execute(
                "UPDATE favorites SET notes = $2, tags = $3, visit_count = $4, \
                 last_visited_at = $5, updated_at = $6, deleted_at = $7 \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[
                    &id,
                    &favorite.notes,
                    &favorite.tags,
                    &favorite.visit_count,
                    &favorite.last_visited_at,
                    &favorite.updated_at,
                    &favorite.deleted_at,
                ],
            )
            .await
            .map_err(restaurant_err)?;

        if updated == 0 {
            return Err(RestaurantError::FavoriteNotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let id = id.to_string();
        let now = OffsetDateTime::now_utc();
        let deleted = conn
            .execute(
                "UPDATE favorites SET deleted_at = $2, updated_at = $2 \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id, &now],
            )
            .await
            .map_err(restaurant_err)?;

        if deleted == 0 {
            return Err(RestaurantError::FavoriteNotFound);
        }
        Ok(())
    }

    async fn exists(&self, user_id: Uuid, restaurant_id: Uuid) -> Result<bool, RestaurantError> {
        match self.find_by_user_and_restaurant(user_id, restaurant_id).await {
            Ok(_) => Ok(true),
            Err(RestaurantError::FavoriteNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn count_by_user_id(&self, user_id: Uuid) -> Result<i64, RestaurantError> {
        let conn = self.get_postgres_connection().await.map_err(restaurant_err)?;
        let user_id = user_id.to_string();
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM favorites WHERE user_id = $1 AND deleted_at IS NULL",
                &[&user_id],
            )
            .await
            .map_err(restaurant_err)?;
        Ok(row.get::<usize, i64>(0))
    }

    async fn find_by_tag(&self, user_id: Uuid, tag: &str) -> Result<Vec<Favorite>, RestaurantError> {
        let user_id = user_id.to_string();
        self.query_favorites(
            "AND user_id = $1 AND $2 = ANY(tags) ORDER BY created_at DESC",
            &[&user_id, &tag],
        )
        .await
    }
}

#[async_trait]
impl UserRepository for PostgresConnectionRepo {
    async fn create(&self, user: &User) -> Result<(), AuthError> {
        let conn = self.get_postgres_connection().await.map_err(auth_err)?;
        let id = user.id.to_string();
        let role = user.role.as_str();
        let res = conn
            .execute(
                "INSERT INTO users (id, email, password_hash, username, role, is_active, \
                 email_verified, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &id,
                    &user.email,
                    &user.password_hash,
                    &user.username,
                    &role,
                    &user.is_active,
                    &user.email_verified,
                    &user.created_at,
                    &user.updated_at,
                ],
            )
            .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AuthError::EmailAlreadyExists),
            Err(e) => Err(auth_err(e)),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<User, AuthError> {
        let conn = self.get_postgres_connection().await.map_err(auth_err)?;
        let id = id.to_string();
        let row = conn
            .query_opt("SELECT * FROM users WHERE id = $1", &[&id])
            .await
            .map_err(auth_err)?
            .ok_or(AuthError::UserNotFound)?;
        parse_row_into_user(&row).map_err(auth_err)
    }

    async fn find_by_email(&self, email: &str) -> Result<User, AuthError> {
        let conn = self.get_postgres_connection().await.map_err(auth_err)?;
        let row = conn
            .query_opt("SELECT * FROM users WHERE LOWER(email) = LOWER($1)", &[&email])
            .await
            .map_err(auth_err)?
            .ok_or(AuthError::UserNotFound)?;
        parse_row_into_user(&row).map_err(auth_err)
    }

    async fn update(&self, user: &User) -> Result<(), AuthError> {
        let conn = self.get_postgres_connection().await.map_err(auth_err)?;
        let id = user.id.to_string();
        let role = user.role.as_str();
        let updated = conn
            .execute(
                "UPDATE users SET email = $2, password_hash = $3, username = $4, role = $5, \
                 is_active = $6, email_verified = $7, updated_at = $8 WHERE id = $1",
                &[
                    &id,
                    &user.email,
                    &user.password_hash,
                    &user.username,
                    &role,
                    &user.is_active,
                    &user.email_verified,
                    &user.updated_at,
                ],
            )
            .await
            .map_err(auth_err)?;

        if updated == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AuthError> {
        let conn = self.get_postgres_connection().await.map_err(auth_err)?;
        let id = id.to_string();
        let deleted = conn
            .execute("DELETE FROM users WHERE id = $1", &[&id])
            .await
            .map_err(auth_err)?;
        if deleted == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for PostgresConnectionRepo {
    async fn create(&self, token: &RefreshToken) -> Result<(), AuthError> {
        let conn = self.get_postgres_connection().await.map_err(auth_err)?;
        let id = token.id.to_string();
        let user_id = token.user_id.to_string();
        conn.execute(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at, revoked_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &id,
                &user_id,
                &token.token_hash,
                &token.expires_at,
                &token.created_at,
                &token.revoked_at,
            ],
        )
        .await
        .map_err(auth_err)?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<RefreshToken, AuthError> {
        let conn = self.get_postgres_connection().await.map_err(auth_err)?;
        let row = conn
            .query_opt(
                "SELECT * FROM refresh_tokens WHERE token_hash = $1",
                &[&token_hash],
            )
            .await
            .map_err(auth_err)?
            .ok_or(AuthError::TokenNotFound)?;
        parse_row_into_refresh_token(&row).map_err(auth_err)
    }

    async fn revoke(&self, id: Uuid) -> Result<(), AuthError> {
        let conn = self.get_postgres_connection().await.map_err(auth_err)?;
        let id = id.to_string();
        let now = OffsetDateTime::now_utc();
        let revoked = conn
            .execute(
                "UPDATE refresh_tokens SET revoked_at = COALESCE(revoked_at, $2) WHERE id = $1",
                &[&id, &now],
            )
            .await
            .map_err(auth_err)?;
        if revoked == 0 {
            return Err(AuthError::TokenNotFound);
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        let conn = self.get_postgres_connection().await.map_err(auth_err)?;
        let user_id = user_id.to_string();
        let now = OffsetDateTime::now_utc();
        conn.execute(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE user_id = $1 AND revoked_at IS NULL",
            &[&user_id, &now],
        )
        .await
        .map_err(auth_err)?;
        Ok(())
    }
}

fn parse_uuid(row: &Row, column: &str) -> anyhow::Result<Uuid> {
    let raw = row.try_get::<&str, &str>(column)?;
    Uuid::parse_str(raw).with_context(|| format!("Column {} holds an invalid uuid: {}", column, raw))
}

fn parse_row_into_restaurant(row: &Row) -> anyhow::Result<Restaurant> {
    let source: RestaurantSource = row.try_get::<&str, &str>("source")?.parse()?;
    let latitude = row.try_get::<&str, Option<f64>>("latitude")?;
    let longitude = row.try_get::<&str, Option<f64>>("longitude")?;
    let opening_hours: HashMap<String, String> =
        serde_json::from_value(row.try_get::<&str, Value>("opening_hours")?)?;
    let metadata = match row.try_get::<&str, Value>("metadata")? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Ok(Restaurant {
        id: parse_uuid(row, "id")?,
        name: row.try_get("name")?,
        name_ja: row.try_get("name_ja")?,
        area: row.try_get("area")?,
        source,
        external_id: row.try_get("external_id")?,
        address: row.try_get("address")?,
        location: match (latitude, longitude) {
            (Some(lat), Some(lng)) => Some(Location { lat, lng }),
            _ => None,
        },
        rating: row.try_get::<&str, f64>("rating")?,
        price_range: row.try_get("price_range")?,
        cuisine_type: row.try_get("cuisine_type")?,
        phone: row.try_get("phone")?,
        website: row.try_get("website")?,
        opening_hours,
        metadata,
        view_count: row.try_get::<&str, i64>("view_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn parse_row_into_favorite(row: &Row) -> anyhow::Result<Favorite> {
    Ok(Favorite {
        id: parse_uuid(row, "id")?,
        user_id: parse_uuid(row, "user_id")?,
        restaurant_id: parse_uuid(row, "restaurant_id")?,
        notes: row.try_get("notes")?,
        tags: row.try_get::<&str, Vec<String>>("tags")?,
        visit_count: row.try_get::<&str, i32>("visit_count")?,
        last_visited_at: row.try_get("last_visited_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// LIMIT/OFFSET values are BIGINT; anything past `i64::MAX` reads as "no rows left".
fn sql_bound(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_row_into_user(row: &Row) -> anyhow::Result<User> {
    let role: Role = row
        .try_get::<&str, &str>("role")?
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    Ok(User {
        id: parse_uuid(row, "id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        username: row.try_get("username")?,
        role,
        is_active: row.try_get("is_active")?,
        email_verified: row.try_get("email_verified")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_row_into_refresh_token(row: &Row) -> anyhow::Result<RefreshToken> {
    Ok(RefreshToken {
        id: parse_uuid(row, "id")?,
        user_id: parse_uuid(row, "user_id")?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}
