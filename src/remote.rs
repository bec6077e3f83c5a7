//! Wire contract of the remote directory service, consumed in orchestrated
//! modes. Messages and the unary client are written out by hand in the shape
//! `tonic-build` would generate, so no protoc step is needed.

use crate::{
    dialer::GrpcConnection,
    error::RegistryError,
    interceptor::TimeoutInterceptor,
};

/// Empty request payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Void {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceList {
    #[prost(string, repeated, tag = "1")]
    pub services: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FindServicesRequest {
    #[prost(string, tag = "1")]
    pub label: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetServiceAddressRequest {
    #[prost(string, tag = "1")]
    pub service: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddressResponse {
    #[prost(string, tag = "1")]
    pub address: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAnnotationRequest {
    #[prost(string, tag = "1")]
    pub service: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub annotation: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AnnotationResponse {
    #[prost(string, tag = "1")]
    pub value: ::prost::alloc::string::String,
}

pub mod directory_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::*;

    /// Unary client for the `directory.Directory` service.
    #[derive(Debug, Clone)]
    pub struct DirectoryClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl DirectoryClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> DirectoryClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_interceptor<F>(
            inner: T,
            interceptor: F,
        ) -> DirectoryClient<InterceptedService<T, F>>
        where
            F: tonic::service::Interceptor,
            T::ResponseBody: Default,
            T: tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
                Response = http::Response<
                    <T as tonic::client::GrpcService<tonic::body::BoxBody>>::ResponseBody,
                >,
            >,
            <T as tonic::codegen::Service<http::Request<tonic::body::BoxBody>>>::Error:
                Into<StdError> + Send + Sync,
        {
            DirectoryClient::new(InterceptedService::new(inner, interceptor))
        }

        pub async fn list_all_services(
            &mut self,
            request: impl tonic::IntoRequest<super::Void>,
        ) -> Result<tonic::Response<super::ServiceList>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/directory.Directory/ListAllServices");
            self.inner.unary(request.into_request(), path, codec).await
        }

        pub async fn find_services(
            &mut self,
            request: impl tonic::IntoRequest<super::FindServicesRequest>,
        ) -> Result<tonic::Response<super::ServiceList>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/directory.Directory/FindServices");
            self.inner.unary(request.into_request(), path, codec).await
        }

        pub async fn get_service_address(
            &mut self,
            request: impl tonic::IntoRequest<super::GetServiceAddressRequest>,
        ) -> Result<tonic::Response<super::AddressResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/directory.Directory/GetServiceAddress");
            self.inner.unary(request.into_request(), path, codec).await
        }

        pub async fn get_http_server_address(
            &mut self,
            request: impl tonic::IntoRequest<super::GetServiceAddressRequest>,
        ) -> Result<tonic::Response<super::AddressResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/directory.Directory/GetHttpServerAddress");
            self.inner.unary(request.into_request(), path, codec).await
        }

        pub async fn get_annotation(
            &mut self,
            request: impl tonic::IntoRequest<super::GetAnnotationRequest>,
        ) -> Result<tonic::Response<super::AnnotationResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/directory.Directory/GetAnnotation");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
}

/// The directory queries that can be delegated to a remote directory service.
///
/// [`GrpcDirectory`] is the production implementation; tests inject fakes the
/// same way the registry's dialer seam is faked.
#[async_trait::async_trait]
pub trait DirectoryRpc: Send + Sync + 'static {
    async fn list_all_services(&self) -> Result<Vec<String>, RegistryError>;
    async fn find_services(&self, label: &str) -> Result<Vec<String>, RegistryError>;
    async fn get_service_address(&self, service: &str) -> Result<String, RegistryError>;
    async fn get_http_server_address(&self, service: &str) -> Result<String, RegistryError>;
    async fn get_annotation(&self, service: &str, annotation: &str)
        -> Result<String, RegistryError>;
}

/// [`DirectoryRpc`] over a pooled connection, with the default timeout
/// interceptor applied to every call.
pub struct GrpcDirectory {
    conn: GrpcConnection,
}

impl GrpcDirectory {
    pub fn new(conn: GrpcConnection) -> Self {
        Self { conn }
    }

    fn client(
        &self,
    ) -> directory_client::DirectoryClient<
        tonic::service::interceptor::InterceptedService<
            tonic::transport::Channel,
            TimeoutInterceptor,
        >,
    > {
        directory_client::DirectoryClient::with_interceptor(
            self.conn.channel(),
            TimeoutInterceptor::default(),
        )
    }
}

fn not_registered(service: &str, status: tonic::Status) -> RegistryError {
    if status.code() == tonic::Code::NotFound {
        RegistryError::NotRegistered {
            service: service.to_string(),
        }
    } else {
        RegistryError::Directory(status)
    }
}

#[async_trait::async_trait]
impl DirectoryRpc for GrpcDirectory {
    async fn list_all_services(&self) -> Result<Vec<String>, RegistryError> {
        let response = self.client().list_all_services(Void {}).await?;
        Ok(response.into_inner().services)
    }

    async fn find_services(&self, label: &str) -> Result<Vec<String>, RegistryError> {
        let response = self
            .client()
            .find_services(FindServicesRequest {
                label: label.to_string(),
            })
            .await?;
        Ok(response.into_inner().services)
    }

    async fn get_service_address(&self, service: &str) -> Result<String, RegistryError> {
        let response = self
            .client()
            .get_service_address(GetServiceAddressRequest {
                service: service.to_string(),
            })
            .await
            .map_err(|s| not_registered(service, s))?;
        Ok(response.into_inner().address)
    }

    async fn get_http_server_address(&self, service: &str) -> Result<String, RegistryError> {
        let response = self
            .client()
            .get_http_server_address(GetServiceAddressRequest {
                service: service.to_string(),
            })
            .await
            .map_err(|s| not_registered(service, s))?;
        Ok(response.into_inner().address)
    }

    async fn get_annotation(
        &self,
        service: &str,
        annotation: &str,
    ) -> Result<String, RegistryError> {
        let response = self
            .client()
            .get_annotation(GetAnnotationRequest {
                service: service.to_string(),
                annotation: annotation.to_string(),
            })
            .await
            .map_err(|status| {
                if status.code() == tonic::Code::NotFound {
                    RegistryError::AnnotationNotFound {
                        service: service.to_string(),
                        annotation: annotation.to_string(),
                    }
                } else {
                    RegistryError::Directory(status)
                }
            })?;
        Ok(response.into_inner().value)
    }
}
