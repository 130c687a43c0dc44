pub mod mock_realtime;
