use cellbroadcast_receiver::channel_config::{configure_all, RadioChannels};
use cellbroadcast_receiver::{FileStore, Intake, MemoryStore, Network, Settings, Source, Store};
use hyper::http::{HeaderValue, Response};
use hyper::{header, Body, Request, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::builder()
        .filter(None, log::LevelFilter::Info)
        .filter_module("cellbroadcast_receiver", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    };

    let store: Arc<dyn Store> = match &settings.store_path {
        Some(path) => match FileStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                log::error!("failed to open store {:?}, keeping broadcasts in memory: {}", path, e);
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    };

    let mut radio = RadioChannels::new();
    if !configure_all(&mut radio, &settings.channels, &settings.preferences) {
        log::warn!("some cell broadcast channels could not be configured");
    }
    for report in radio.report() {
        log::info!(
            "{:?} subscription {}: channels {}",
            report.network,
            report.subscription,
            report.channels
        );
    }

    let intake = Intake::new(store)
        .with_emergency_ids(Network::Gsm, settings.channels.gsm_emergency_ids.clone())
        .with_emergency_ids(Network::Cdma, settings.channels.cdma_emergency_ids.clone());
    let intake = Arc::new(intake);
    let source = Source::new(settings.source_uri.clone());
    let endpoint =
        cellbroadcast_receiver::server::Server::new(source, intake).with_channels(radio.report());

    let context = Arc::new(Context {
        allow_all_origins: settings.allow_all_origins,
        server: endpoint,
    });

    let make_service =
        hyper::service::make_service_fn(move |socket: &hyper::server::conn::AddrStream| {
            let context = context.clone();
            let addr = socket.remote_addr();
            async move {
                Ok::<_, Infallible>(hyper::service::service_fn(move |req| {
                    let context = context.clone();
                    async move { context.serve(addr, req).await }
                }))
            }
        });

    let server = hyper::server::Server::bind(&settings.listen).serve(make_service);
    log::info!("listening for HTTP requests on {}", settings.listen);

    if let Err(e) = server.await {
        log::error!("server error: {}", e);
    }
}

#[derive(Debug)]
struct Context {
    server: cellbroadcast_receiver::server::Server,
    allow_all_origins: bool,
}

impl Context {
    async fn serve(
        &self,
        remote_addr: SocketAddr,
        request: Request<Body>,
    ) -> hyper::http::Result<Response<Body>> {
        log::info!(
            "request from {}: {} {}",
            remote_addr,
            request.method(),
            request.uri().path()
        );

        let path = request.uri().path().to_owned();
        match path.as_str() {
            "/stream" => self.server.stream(request).await,
            "/broadcasts" => self.server.broadcasts(request).await,
            "/channels" => self.server.channels(request).await,
            p => match p.strip_prefix("/broadcasts/") {
                Some(id) => self.server.broadcast(request, id).await,
                None => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body("not found".into()),
            },
        }
        .map(|mut response| {
            if self.allow_all_origins {
                response.headers_mut().insert(
                    header::ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("*"),
                );
            }
            response
        })
    }
}
