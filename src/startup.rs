use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::SessionManager;
use crate::identity::IdentityDirectory;
use crate::logger::LoggerMiddleware;
use crate::middleware::AuthMiddleware;
use crate::routes::{
    delete_account, health_check, json_config, logout_all, refresh, revoke, revoke_path, status,
    whoami,
};

pub fn run(
    listener: TcpListener,
    sessions: SessionManager,
    directory: Arc<dyn IdentityDirectory>,
) -> Result<Server, std::io::Error> {
    let sessions_data = web::Data::new(sessions.clone());
    let directory_data: web::Data<dyn IdentityDirectory> = web::Data::from(directory);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            // Tokens travel in the path of the blacklist route
            .wrap(Logger::default().exclude_regex("^/auth/blacklist/"))
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(sessions_data.clone())
            .app_data(directory_data.clone())
            .app_data(json_config())

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/revoke", web::post().to(revoke))
            .route(
                "/auth/blacklist/{access_token}/{refresh_token}",
                web::delete().to(revoke_path),
            )

            // Optionally authenticated
            .service(
                web::resource("/auth/status")
                    .wrap(AuthMiddleware::optional(sessions.clone()))
                    .route(web::get().to(status)),
            )

            // Protected routes (require a valid access token)
            .service(
                web::scope("/api")
                    .wrap(AuthMiddleware::required(sessions.clone()))
                    .route("/whoami", web::get().to(whoami))
                    .route("/logout-all", web::post().to(logout_all))
                    .route("/account", web::delete().to(delete_account)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
