//! VyaparConnect API Library
//!
//! WhatsApp Business CRM for small shops: contacts and chats, a product
//! catalog, quotations and orders with payment tracking, Razorpay payment
//! links, broadcasts, an AI assistant and realtime dashboard updates.
//!
//! # Modules
//!
//! - `assistant`: Gemini client and the tool-calling chat loop.
//! - `auth`: API tokens and the bearer-auth middleware.
//! - `billing`: Money math and the quotation/order state machines.
//! - `broadcast`: Background execution of broadcast campaigns.
//! - `circuit_breaker`: Circuit breaker for outbound API calls.
//! - `config`: Configuration management.
//! - `db`: Database connection pool and migrations.
//! - `errors`: Error handling types.
//! - `events`: Per-business realtime event bus.
//! - `gateway_client`: Razorpay payment-link client.
//! - `handlers`: HTTP request handlers and shared state.
//! - `media`: Cloudinary image upload client.
//! - `models`: Database rows and request types.
//! - `outbound`: Store-then-send of outbound WhatsApp messages.
//! - `payment_webhook_handler`: Razorpay webhook.
//! - `routes`: Router, middleware and OpenAPI document.
//! - `signatures`: Token hashing and webhook signature checks.
//! - `storage`: Database queries, one file per area.
//! - `validation`: Phone, email, tag and text helpers.
//! - `webhook_handler`: WhatsApp Cloud API webhook.
//! - `webhook_models`: Provider webhook payloads.
//! - `whatsapp_client`: WhatsApp Cloud API client.

pub mod assistant;
pub mod auth;
pub mod billing;
pub mod broadcast;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod gateway_client;
pub mod handlers;
pub mod media;
pub mod models;
pub mod outbound;
pub mod payment_webhook_handler;
pub mod routes;
pub mod signatures;
pub mod storage;
pub mod validation;
pub mod webhook_handler;
pub mod webhook_models;
pub mod whatsapp_client;
