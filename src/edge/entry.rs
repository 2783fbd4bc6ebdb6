//! Per-request dispatch through the edge stages.

use crate::edge::image::ImageHandler;
use crate::edge::Edge;
use crate::http::event::{InternalEvent, Routed};
use crate::lifecycle::tasks::RequestTasks;
use crate::origin::ExternalProxy;

impl Edge {
    /// Run `event` through skew protection, the image endpoints and routing.
    /// Background work the request starts is pushed onto `tasks`.
    pub async fn handle(&self, event: InternalEvent, external: &ExternalProxy, tasks: &RequestTasks) -> Routed {
        if let Some(result) = self.skew.maybe_proxy(&event, external).await {
            return Routed::Respond(result);
        }
        if ImageHandler::is_cdn_cgi_request(&event) {
            return Routed::Respond(self.images.handle_cdn_cgi(&event).await);
        }
        if self.images.is_image_request(&event) {
            return Routed::Respond(self.images.handle(&event).await);
        }
        self.routing.route(event, tasks).await
    }
}
