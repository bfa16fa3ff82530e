use cell_index::config::{AppConfig, ConfigFile};
use cell_index::gating::{self, Gate, Gates};
use cell_index::geometry::Point;
use cell_index::tree::CellIndex;
use cell_index::{describe, query, DatasetHandle, DatasetRegistry};

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use hyper::server::Server;

use clap::Parser;
use log::{error, info, warn};
use serde_json::{json, Value};

#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Settings file (yaml); defaults are used when it does not exist
    #[arg(short, long, default_value = "settings.yaml")]
    settings: PathBuf,

    //Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    address: SocketAddr,

    //Dataset to load before accepting requests
    #[arg(short, long)]
    preload: Option<String>,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    UnknownRoute(String),
    Internal(String),
    Core(cell_index::Error),
}

impl From<cell_index::Error> for ApiError {

    fn from(e: cell_index::Error) -> Self {
        ApiError::Core(e)
    }
}

impl ApiError {

    fn status(&self) -> StatusCode {

        return match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(e) => match e.is_client_error() {
                true => StatusCode::BAD_REQUEST,
                false => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
    }

    fn message(&self) -> String {

        return match self {
            ApiError::BadRequest(m) | ApiError::Internal(m) => m.clone(),
            ApiError::UnknownRoute(path) => format!("route not recognized: {}", path),
            ApiError::Core(e) => e.to_string(),
        };
    }
}

enum Reply {
    Json(Value),
    Csv(Vec<u8>),
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Reply, ApiError> {

    return serde_json::to_value(value)
        .map(Reply::Json)
        .map_err(|e| ApiError::Core(e.into()));
}

/// Query string and decoded body of one request.
struct Params {
    query: HashMap<String, String>,
    body: Value,
}

impl Params {

    fn parse(uri_query: Option<&str>, content_type: &str, body: &[u8]) -> Result<Self, ApiError> {

        let query: HashMap<String, String> = match uri_query {
            Some(q) => url::form_urlencoded::parse(q.as_bytes()).into_owned().collect(),
            None => HashMap::new(),
        };

        let body = match body.is_empty() {
            true => Value::Null,
            false => match content_type.starts_with("application/x-www-form-urlencoded") {
                true => {
                    let form: serde_json::Map<String, Value> = url::form_urlencoded::parse(body)
                        .into_owned()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect();
                    Value::Object(form)
                },
                false => serde_json::from_slice(body)
                    .map_err(|e| ApiError::BadRequest(format!("request body is not json: {}", e)))?,
            },
        };

        return Ok(Self { query, body });
    }

    fn str(&self, name: &str) -> Result<&str, ApiError> {

        if let Some(value) = self.query.get(name) {
            return Ok(value.as_str());
        }

        return self.body.get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiError::BadRequest(format!("missing parameter {:?}", name)));
    }

    fn f64(&self, name: &str) -> Result<f64, ApiError> {

        if let Some(number) = self.body.get(name).and_then(|v| v.as_f64()) {
            return Ok(number);
        }

        let value = self.str(name)?;

        return value.trim().parse::<f64>()
            .map_err(|_| ApiError::BadRequest(format!("parameter {:?} is not a number: {:?}", name, value)));
    }

    fn flag(&self, name: &str) -> bool {

        if let Some(Value::Bool(b)) = self.body.get(name) {
            return *b;
        }

        return match self.str(name) {
            Ok(v) => matches!(v, "true" | "True" | "1"),
            Err(_) => false,
        };
    }

    /// A parameter holding json: a body field as is, or a string (query or form) to decode.
    fn json(&self, name: &str) -> Result<Value, ApiError> {

        if let Some(value) = self.body.get(name) {
            if !value.is_string() {
                return Ok(value.clone());
            }
        }

        let text = self.str(name)?;

        return serde_json::from_str(text)
            .map_err(|e| ApiError::BadRequest(format!("parameter {:?} is not json: {}", name, e)));
    }

    fn datasource(&self) -> Result<&str, ApiError> {
        return self.str("datasource");
    }
}

fn parse_id(value: &Value) -> Result<CellIndex, ApiError> {

    return value.as_u64()
        .or_else(|| value.get("id").and_then(|v| v.as_u64()))
        .ok_or_else(|| ApiError::BadRequest(format!("{} is not a cell id", value)));
}

fn parse_ids(value: &Value) -> Result<Vec<CellIndex>, ApiError> {

    return match value.as_array() {
        Some(items) => items.iter().map(parse_id).collect(),
        None => Err(ApiError::BadRequest("expected a list of cell ids".to_string())),
    };
}

fn parse_polygon(value: &Value) -> Result<Vec<Point>, ApiError> {

    let items = value.as_array()
        .ok_or_else(|| ApiError::BadRequest("points must be a list".to_string()))?;

    let mut polygon = Vec::with_capacity(items.len());
    for item in items.iter() {

        let point = item.get("imagePoints").unwrap_or(item);

        match (point.get("x").and_then(|v| v.as_f64()), point.get("y").and_then(|v| v.as_f64())) {
            (Some(x), Some(y)) => polygon.push(Point::new(x, y)),
            _ => return Err(ApiError::BadRequest(format!("bad polygon point {}", item))),
        }
    }

    return Ok(polygon);
}

fn parse_channel_gates(value: &Value) -> Result<Vec<(String, Gate)>, ApiError> {

    //same shape as a gate map, kept in request order
    let gates = gating::parse_gates(value)?;

    let order: Vec<String> = match value.as_object() {
        Some(object) => object.keys().cloned().collect(),
        None => Vec::new(),
    };

    return Ok(order.into_iter().filter_map(|k| gates.get(&k).map(|g| (k, *g))).collect());
}

fn elem(params: &Params) -> Result<&Value, ApiError> {

    return params.body.get("elem")
        .ok_or_else(|| ApiError::BadRequest("missing elem".to_string()));
}

fn elem_id(params: &Params) -> Result<u64, ApiError> {

    return elem(params)?.get("id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ApiError::BadRequest("missing elem.id".to_string()));
}

fn dataset(registry: &DatasetRegistry, params: &Params) -> Result<DatasetHandle, ApiError> {

    let reload = params.flag("reload");

    return Ok(registry.ensure_loaded(params.datasource()?, reload)?);
}

fn dispatch(registry: &DatasetRegistry, method: &Method, path: &str, params: &Params) -> Result<Reply, ApiError> {

    let neighborhoods = registry.neighborhoods();

    return match (method, path) {

        (&Method::GET, "/load_datasource") => {
            let ds = dataset(registry, params)?;
            to_json(json!({"name": ds.name, "cells": ds.len()}))
        },

        (&Method::GET, "/get_nearest_cell") => {
            let ds = dataset(registry, params)?;
            let nearest = query::nearest_cell(&ds, params.f64("point_x")?, params.f64("point_y")?)?;
            match nearest {
                Some(n) => to_json(n.cell),
                None => to_json(json!({})),
            }
        },

        (&Method::GET, "/get_individual_neighborhood") => {
            let ds = dataset(registry, params)?;
            to_json(query::cells_in_radius(&ds, params.f64("point_x")?, params.f64("point_y")?, params.f64("max_distance")?, None)?)
        },

        (&Method::GET, "/get_rect_cells") => {
            let ds = dataset(registry, params)?;
            let rect: Vec<f64> = params.str("rect")?
                .split(',')
                .map(|x| x.trim().parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|_| ApiError::BadRequest("rect must be x,y,r".to_string()))?;

            match rect.as_slice() {
                [x, y, r] => to_json(query::cells_in_radius(&ds, *x, *y, *r, None)?),
                _ => Err(ApiError::BadRequest("rect must be x,y,r".to_string())),
            }
        },

        (&Method::GET, "/get_num_cells_in_circle") => {
            let ds = dataset(registry, params)?;
            to_json(query::count_in_radius(&ds, params.f64("point_x")?, params.f64("point_y")?, params.f64("radius")?)?)
        },

        (&Method::GET, "/get_cells_in_polygon") => {
            let ds = dataset(registry, params)?;
            let polygon = parse_polygon(&params.json("points")?)?;
            to_json(query::cells_in_polygon(&ds, &polygon)?)
        },

        (&Method::POST, "/get_cells") => {
            let ds = dataset(registry, params)?;
            let ids = parse_ids(elem(params)?.get("ids").unwrap_or(&Value::Null))?;
            to_json(query::selection_view(&ds, &ids, None)?)
        },

        (&Method::POST, "/get_similar_neighborhood_to_selection") => {
            let ds = dataset(registry, params)?;
            let seeds = parse_ids(&params.json("selectionIds")?)?;
            to_json(query::similar_to_selection(&ds, &seeds, params.f64("similarity")?)?)
        },

        (&Method::GET, "/get_gated_cell_ids") => {
            let ds = dataset(registry, params)?;
            let gates = gating::parse_gates(&params.json("filter")?)?;
            let ids = gating::gated_ids(&ds, &gates)?;
            to_json(ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>())
        },

        (&Method::GET, "/get_channel_cell_ids") => {
            let ds = dataset(registry, params)?;
            let channels: Vec<String> = serde_json::from_value(params.json("filter")?)
                .map_err(|_| ApiError::BadRequest("filter must be a list of channels".to_string()))?;
            let ids = gating::channel_ids(&ds, &channels)?;
            to_json(ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>())
        },

        (&Method::POST, "/download_gating_csv") => {
            let ds = dataset(registry, params)?;
            let gates: Gates = gating::parse_gates(&params.json("filter")?)?;
            let channels = parse_channel_gates(&params.json("channels")?)?;

            let mut out: Vec<u8> = Vec::new();
            match params.flag("fullCsv") {
                true => {
                    let names: Vec<String> = channels.into_iter().map(|(name, _)| name).collect();
                    gating::gating_flags(&ds, &gates, &names, &mut out)?;
                },
                false => gating::gate_table(&gates, &channels, &mut out)?,
            }

            Ok(Reply::Csv(out))
        },

        (&Method::GET, "/get_channel_names") => {
            let ds = dataset(registry, params)?;
            to_json(query::channel_names(&ds, params.flag("shortNames")))
        },

        (&Method::GET, "/get_phenotypes") => {
            let ds = dataset(registry, params)?;
            to_json(query::phenotypes(&ds))
        },

        (&Method::GET, "/get_cluster_labels") => {
            let ds = dataset(registry, params)?;
            to_json(query::cluster_labels(&ds))
        },

        (&Method::GET, "/get_scatterplot_data") => {
            let ds = dataset(registry, params)?;
            to_json(query::scatterplot(&ds))
        },

        (&Method::GET, "/get_datasource_description") => {
            let ds = dataset(registry, params)?;
            to_json(describe::describe(&ds.cells))
        },

        (&Method::GET, "/get_neighborhood_list") => {
            let ds = dataset(registry, params)?;
            to_json(neighborhoods.list(&ds.name)?)
        },

        (&Method::GET, "/get_all_neighborhood_stats") => {
            let ds = dataset(registry, params)?;
            to_json(neighborhoods.all_statistics(&ds)?)
        },

        (&Method::GET, "/get_cluster_cells") => {
            let ds = dataset(registry, params)?;
            to_json(neighborhoods.cluster_statistics(&ds)?)
        },

        (&Method::POST, "/get_neighborhood") => {
            let ds = dataset(registry, params)?;
            let neighborhood = neighborhoods.get(&ds.name, elem_id(params)?)?;
            to_json(neighborhoods.get_statistics(&ds, &neighborhood)?)
        },

        (&Method::POST, "/save_neighborhood") => {
            let ds = dataset(registry, params)?;
            let selection = params.json("selection")?;
            let ids = parse_ids(selection.get("cells").unwrap_or(&Value::Null))?;
            let name = selection.get("name").and_then(|v| v.as_str()).unwrap_or("");
            neighborhoods.create(&ds.name, name, ids, params.flag("isCluster"))?;
            to_json(neighborhoods.list(&ds.name)?)
        },

        (&Method::POST, "/edit_neighborhood") => {
            let ds = dataset(registry, params)?;
            let elem = elem(params)?;
            let field = elem.get("editField")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ApiError::BadRequest("missing elem.editField".to_string()))?;
            neighborhoods.edit(&ds.name, elem_id(params)?, field, elem.get("editValue").unwrap_or(&Value::Null))?;
            to_json(neighborhoods.list(&ds.name)?)
        },

        (&Method::POST, "/delete_neighborhood") => {
            let ds = dataset(registry, params)?;
            neighborhoods.soft_delete(&ds.name, elem_id(params)?)?;
            to_json(neighborhoods.list(&ds.name)?)
        },

        _ => Err(ApiError::UnknownRoute(path.to_string())),
    };
}

fn respond(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response<Body> {

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;

    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }

    return response;
}

fn error_response(e: ApiError) -> Response<Body> {

    let status = e.status();
    match status.is_server_error() {
        true => error!("{}", e.message()),
        false => warn!("{}", e.message()),
    }

    let body = json!({"error": e.message()}).to_string().into_bytes();

    return respond(status, "application/json", body);
}

async fn handle(req: Request<Body>, registry: Arc<DatasetRegistry>) -> Result<Response<Body>, Infallible> {

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let uri_query = req.uri().query().map(|q| q.to_string());
    let content_type = req.headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => return Ok(error_response(ApiError::BadRequest(format!("can't read body: {}", e)))),
    };

    let params = match Params::parse(uri_query.as_deref(), &content_type, &body) {
        Ok(p) => p,
        Err(e) => return Ok(error_response(e)),
    };

    //loads and queries are blocking work
    let route = path.clone();
    let result = tokio::task::spawn_blocking(move || dispatch(&registry, &method, &route, &params)).await;

    let response = match result {
        Ok(Ok(Reply::Json(value))) => respond(StatusCode::OK, "application/json", value.to_string().into_bytes()),
        Ok(Ok(Reply::Csv(data))) => {
            let mut response = respond(StatusCode::OK, "text/csv", data);
            response.headers_mut().insert(
                hyper::header::CONTENT_DISPOSITION,
                hyper::header::HeaderValue::from_static("attachment; filename=gating_csv.csv"),
            );
            response
        },
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(ApiError::Internal(format!("request for {} did not complete: {}", path, e))),
    };

    return Ok(response);
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {

    env_logger::init();

    let args = Args::parse();

    let app_config = match args.settings.is_file() {
        true => AppConfig::from_file(&args.settings)?,
        false => AppConfig::default(),
    };

    let provider = Arc::new(ConfigFile::new(Path::new(&app_config.config_path)));
    let registry = Arc::new(DatasetRegistry::open(provider, app_config)?);

    if let Some(name) = &args.preload {
        let preload_registry = registry.clone();
        let name = name.clone();
        tokio::task::spawn_blocking(move || preload_registry.ensure_loaded(&name, false)).await??;
    }

    // For every connection, we must make a `Service` to handle all
    // incoming HTTP requests on said connection.
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| {
            let registry = registry.clone();
            handle(req, registry)
        }))}
    });

    let server = Server::bind(&args.address).serve(make_svc);

    info!("Listening on http://{}", args.address);

    server.await?;

    Ok(())
}
