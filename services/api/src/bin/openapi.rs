//! services/api/src/bin/openapi.rs
//!
//! Prints the OpenAPI specification as JSON, for generating clients without
//! starting the server.

use api_lib::web::ApiDoc;
use utoipa::OpenApi;

fn main() {
    let spec = ApiDoc::openapi()
        .to_pretty_json()
        .expect("OpenAPI spec serializes");
    println!("{}", spec);
}
