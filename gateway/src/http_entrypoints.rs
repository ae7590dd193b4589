// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP entrypoint functions for the provisioning gateway

use crate::error::Error;
use crate::params::result_views;
use crate::params::AwsInstancesCreate;
use crate::params::AzureInstancesCreate;
use crate::params::AzureVmSelector;
use crate::params::GcpInstanceSelector;
use crate::params::GcpInstancesCreate;
use crate::params::InstanceView;
use crate::ServerContext;
use dropshot::endpoint;
use dropshot::ApiDescription;
use dropshot::HttpError;
use dropshot::HttpResponseCreated;
use dropshot::HttpResponseOk;
use dropshot::Query;
use dropshot::RequestContext;
use dropshot::TypedBody;
use slog::info;
use slog::o;
use std::sync::Arc;

type GatewayApiDescription = ApiDescription<Arc<ServerContext>>;

/// Returns a description of the gateway API
pub fn api() -> GatewayApiDescription {
    fn register_endpoints(
        api: &mut GatewayApiDescription,
    ) -> Result<(), String> {
        api.register(aws_instances_create).map_err(|e| e.to_string())?;
        api.register(gcp_instances_create).map_err(|e| e.to_string())?;
        api.register(gcp_instance_get).map_err(|e| e.to_string())?;
        api.register(azure_instances_create).map_err(|e| e.to_string())?;
        api.register(azure_vm_get).map_err(|e| e.to_string())?;
        Ok(())
    }

    let mut api = GatewayApiDescription::new();
    if let Err(err) = register_endpoints(&mut api) {
        panic!("failed to register entrypoints: {}", err);
    }
    api
}

/// Provision a range of EC2 instances
#[endpoint {
    method = POST,
    path = "/aws",
}]
async fn aws_instances_create(
    rqctx: RequestContext<Arc<ServerContext>>,
    body: TypedBody<AwsInstancesCreate>,
) -> Result<HttpResponseCreated<Vec<InstanceView>>, HttpError> {
    let apictx = rqctx.context();
    let pipeline = apictx.aws()?;
    let request = body.into_inner().into_request().map_err(Error::from)?;
    let log = rqctx.log.new(o!("provider" => "aws"));
    info!(log, "create request"; "count" => %request.count);

    let result = apictx
        .orchestrator
        .provision(&log, pipeline, request)
        .await
        .map_err(Error::from)?;
    Ok(HttpResponseCreated(result_views(result)))
}

/// Provision a range of Compute Engine instances
#[endpoint {
    method = POST,
    path = "/gcp",
}]
async fn gcp_instances_create(
    rqctx: RequestContext<Arc<ServerContext>>,
    body: TypedBody<GcpInstancesCreate>,
) -> Result<HttpResponseCreated<Vec<InstanceView>>, HttpError> {
    let apictx = rqctx.context();
    let pipeline = apictx.gcp()?;
    let request = body.into_inner().into_request().map_err(Error::from)?;
    let log = rqctx.log.new(o!("provider" => "gcp"));
    info!(log, "create request"; "count" => %request.count);

    let result = apictx
        .orchestrator
        .provision(&log, pipeline, request)
        .await
        .map_err(Error::from)?;
    Ok(HttpResponseCreated(result_views(result)))
}

/// Look up one Compute Engine instance
#[endpoint {
    method = GET,
    path = "/gcp",
}]
async fn gcp_instance_get(
    rqctx: RequestContext<Arc<ServerContext>>,
    query: Query<GcpInstanceSelector>,
) -> Result<HttpResponseOk<InstanceView>, HttpError> {
    let apictx = rqctx.context();
    let pipeline = apictx.gcp()?;
    let GcpInstanceSelector { instance_name, zone } = query.into_inner();
    let log = rqctx.log.new(o!("provider" => "gcp"));

    let record = pipeline
        .instance_status(&log, &zone, &instance_name)
        .await
        .map_err(Error::from)?;
    Ok(HttpResponseOk(record.into()))
}

/// Provision a range of Azure virtual machines
#[endpoint {
    method = POST,
    path = "/azure",
}]
async fn azure_instances_create(
    rqctx: RequestContext<Arc<ServerContext>>,
    body: TypedBody<AzureInstancesCreate>,
) -> Result<HttpResponseCreated<Vec<InstanceView>>, HttpError> {
    let apictx = rqctx.context();
    let pipeline = apictx.azure()?;
    let request = body.into_inner().into_request().map_err(Error::from)?;
    let log = rqctx.log.new(o!("provider" => "azure"));
    info!(log, "create request"; "count" => %request.count);

    let result = apictx
        .orchestrator
        .provision(&log, pipeline, request)
        .await
        .map_err(Error::from)?;
    Ok(HttpResponseCreated(result_views(result)))
}

/// Look up one Azure virtual machine
#[endpoint {
    method = GET,
    path = "/azure",
}]
async fn azure_vm_get(
    rqctx: RequestContext<Arc<ServerContext>>,
    query: Query<AzureVmSelector>,
) -> Result<HttpResponseOk<InstanceView>, HttpError> {
    let apictx = rqctx.context();
    let pipeline = apictx.azure()?;
    let AzureVmSelector { resource_group, vm_name } = query.into_inner();
    let log = rqctx.log.new(o!("provider" => "azure"));

    let record = pipeline
        .vm_status(&log, &resource_group, &vm_name)
        .await
        .map_err(Error::from)?;
    Ok(HttpResponseOk(record.into()))
}
