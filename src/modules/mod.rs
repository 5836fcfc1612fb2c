pub mod face_mesh_client;
