use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, HttpMessage, HttpResponse, Responder,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures::future::{ok, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::error;
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::user::{Role, User};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Deserialize)]
pub struct SignupInfo {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Deserialize)]
pub struct LoginInfo {
    pub email: String,
    pub password: String,
}

pub fn create_jwt(user_id: &str, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Bearer-token middleware. On a valid token the user id lands in the
/// request extensions for handlers to pick up; an invalid token short-
/// circuits with 401. Requests without a token pass through so the open
/// routes (signup/login) keep working.
#[derive(Debug)]
pub struct Authentication {
    jwt_secret: String,
}

impl Authentication {
    pub fn new(jwt_secret: String) -> Self {
        Authentication { jwt_secret }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            jwt_secret: self.jwt_secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    jwt_secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
            if let Ok(auth_str) = auth_header.to_str() {
                if auth_str.starts_with("Bearer ") {
                    let token = auth_str.trim_start_matches("Bearer ").trim();
                    match validate_jwt(token, &self.jwt_secret) {
                        Ok(claims) => {
                            req.extensions_mut().insert(claims.sub);
                        }
                        Err(e) => {
                            let (req_parts, _payload) = req.into_parts();
                            let resp = HttpResponse::Unauthorized()
                                .body(format!("Invalid token: {}", e))
                                .map_into_boxed_body();
                            let srv_resp = ServiceResponse::new(req_parts, resp);
                            return Box::pin(async move { Ok(srv_resp) });
                        }
                    }
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

pub async fn signup(
    data: web::Data<AppState>,
    signup_info: web::Json<SignupInfo>,
) -> impl Responder {
    let users = data.mongodb.db.collection::<User>("users");

    match users.find_one(doc! { "email": &signup_info.email }).await {
        Ok(Some(_)) => {
            return HttpResponse::Conflict().body("An account with this email already exists")
        }
        Ok(None) => {}
        Err(e) => {
            error!("Error checking existing user: {}", e);
            return HttpResponse::InternalServerError().body("Error creating account");
        }
    }

    let hashed_password = match hash(&signup_info.password, DEFAULT_COST) {
        Ok(h) => h,
        Err(_) => return HttpResponse::InternalServerError().body("Error hashing password"),
    };

    let new_user = User {
        user_id: Uuid::new_v4().to_string(),
        email: signup_info.email.clone(),
        display_name: signup_info.display_name.clone(),
        hashed_password,
        role: signup_info.role,
    };

    match users.insert_one(&new_user).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "User created",
            "userId": new_user.user_id,
            "role": new_user.role,
        })),
        Err(e) => {
            error!("Error inserting user: {}", e);
            HttpResponse::InternalServerError().body("Error creating account")
        }
    }
}

pub async fn login(data: web::Data<AppState>, login_info: web::Json<LoginInfo>) -> impl Responder {
    let users = data.mongodb.db.collection::<User>("users");
    let user_doc = users.find_one(doc! { "email": &login_info.email }).await;

    match user_doc {
        Ok(Some(user)) => {
            if verify(&login_info.password, &user.hashed_password).unwrap_or(false) {
                match create_jwt(&user.user_id, &data.config.jwt_secret) {
                    Ok(token) => HttpResponse::Ok().json(serde_json::json!({
                        "token": token,
                        "userId": user.user_id,
                        "displayName": user.display_name,
                        "role": user.role,
                    })),
                    Err(e) => {
                        error!("Error issuing token: {}", e);
                        HttpResponse::InternalServerError().body("Error logging in")
                    }
                }
            } else {
                HttpResponse::Unauthorized().body("Invalid credentials")
            }
        }
        Ok(None) => HttpResponse::Unauthorized().body("Invalid credentials"),
        Err(e) => {
            error!("Error logging in: {}", e);
            HttpResponse::InternalServerError().body("Error logging in")
        }
    }
}

/// Look up the authenticated user's document, for handlers that need the
/// display name and marketplace role behind the token.
pub async fn current_user(data: &AppState, user_id: &str) -> Option<User> {
    let users = data.mongodb.db.collection::<User>("users");
    users.find_one(doc! { "_id": user_id }).await.ok().flatten()
}
