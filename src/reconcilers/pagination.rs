// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pagination helpers for Kubernetes and cloud API list operations.
//!
//! Both APIs hand out continuation cursors; these helpers follow them until the last
//! page so callers always see the complete set.

use super::retry::retry_api_call;
use crate::cloud::types::{Page, PageRequest};
use crate::constants::KUBE_LIST_PAGE_SIZE;
use anyhow::Result;
use kube::{api::ListParams, Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use tracing::debug;

/// List every object matching `params`, following `continue` tokens.
///
/// Pages are requested [`KUBE_LIST_PAGE_SIZE`] at a time and each page request is
/// retried on transient API errors.
///
/// # Errors
///
/// Returns the first permanent Kubernetes API error.
pub async fn list_all_paginated<K>(api: &Api<K>, params: ListParams) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let mut params = params.limit(KUBE_LIST_PAGE_SIZE);
    let mut objects = Vec::new();
    let mut pages = 0_u32;

    loop {
        let list = retry_api_call(|| api.list(&params), "list").await?;
        pages += 1;
        objects.extend(list.items);

        match list.metadata.continue_ {
            Some(token) if !token.is_empty() => params.continue_token = Some(token),
            _ => break,
        }
    }

    debug!(
        kind = %K::kind(&()),
        pages,
        total = objects.len(),
        "Listed Kubernetes objects"
    );
    Ok(objects)
}

/// Follow cloud API cursors until the last page.
///
/// `fetch` receives the request for each page; the first request carries no marker.
///
/// # Errors
///
/// Returns the first error reported by `fetch`.
pub async fn collect_pages<T, E, F, Fut>(mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    let mut items = Vec::new();
    let mut request = PageRequest::default();

    loop {
        let page = fetch(request.clone()).await?;
        items.extend(page.items);

        match page.next {
            Some(marker) if request.marker.as_ref() != Some(&marker) => {
                request.marker = Some(marker);
            }
            _ => break,
        }
    }

    Ok(items)
}

#[cfg(test)]
#[path = "pagination_tests.rs"]
mod pagination_tests;
